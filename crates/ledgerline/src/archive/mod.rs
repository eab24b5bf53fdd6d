// Copyright 2025 PRAGMA
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use async_trait::async_trait;
use ledgerline_kernel::{Cancelled, LedgerSequence, StateSnapshot};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub mod in_memory;
pub use in_memory::MemoryArchive;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
    #[error("ledger {0} is not a checkpoint")]
    NotACheckpoint(LedgerSequence),
    #[error("no state published for checkpoint {0}")]
    MissingCheckpoint(LedgerSequence),
    #[error("history archive is empty")]
    Empty,
}

impl ArchiveError {
    pub fn is_cancellation(&self) -> bool {
        matches!(self, ArchiveError::Cancelled(_))
    }
}

/// Independent source of full ledger state, published at every checkpoint.
#[async_trait]
pub trait HistoryArchive: Send + Sync {
    async fn latest_checkpoint(
        &self,
        cancel: &CancellationToken,
    ) -> Result<LedgerSequence, ArchiveError>;

    /// The reference state right after `checkpoint` closed.
    async fn state_at(
        &self,
        checkpoint: LedgerSequence,
        cancel: &CancellationToken,
    ) -> Result<StateSnapshot, ArchiveError>;
}
