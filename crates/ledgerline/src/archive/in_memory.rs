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

use super::{ArchiveError, HistoryArchive};
use async_trait::async_trait;
use checkpoint_arithmetic::CheckpointManager;
use ledgerline_kernel::{Cancelled, LedgerSequence, StateSnapshot};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
pub struct MemoryArchive {
    checkpoints: CheckpointManager,
    snapshots: Mutex<BTreeMap<LedgerSequence, StateSnapshot>>,
}

impl MemoryArchive {
    pub fn new(checkpoints: CheckpointManager) -> Self {
        Self {
            checkpoints,
            snapshots: Mutex::new(BTreeMap::new()),
        }
    }

    /// Publish the state of a checkpoint ledger.
    pub fn publish(&self, snapshot: StateSnapshot) -> Result<(), ArchiveError> {
        if !self.checkpoints.is_checkpoint(snapshot.sequence.as_u32()) {
            return Err(ArchiveError::NotACheckpoint(snapshot.sequence));
        }
        self.snapshots.lock().insert(snapshot.sequence, snapshot);
        Ok(())
    }
}

#[async_trait]
impl HistoryArchive for MemoryArchive {
    async fn latest_checkpoint(
        &self,
        cancel: &CancellationToken,
    ) -> Result<LedgerSequence, ArchiveError> {
        if cancel.is_cancelled() {
            return Err(Cancelled.into());
        }
        self.snapshots
            .lock()
            .keys()
            .next_back()
            .copied()
            .ok_or(ArchiveError::Empty)
    }

    async fn state_at(
        &self,
        checkpoint: LedgerSequence,
        cancel: &CancellationToken,
    ) -> Result<StateSnapshot, ArchiveError> {
        if cancel.is_cancelled() {
            return Err(Cancelled.into());
        }
        if !self.checkpoints.is_checkpoint(checkpoint.as_u32()) {
            return Err(ArchiveError::NotACheckpoint(checkpoint));
        }
        self.snapshots
            .lock()
            .get(&checkpoint)
            .cloned()
            .ok_or(ArchiveError::MissingCheckpoint(checkpoint))
    }
}
