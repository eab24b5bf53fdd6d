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
use ledgerline_kernel::{cbor, Cancelled, IngestionRange, LedgerCloseMeta, LedgerSequence};
use std::fmt;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub mod in_memory;
pub use in_memory::MemoryLedgerSource;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
    #[error("range {0} has not been prepared")]
    NotPrepared(LedgerRange),
    #[error("unable to decode ledger {sequence}: {source}")]
    Decode {
        sequence: LedgerSequence,
        source: cbor::decode::Error,
    },
    #[error("ledger source is closed")]
    Closed,
    #[error("ledger source failure: {0}")]
    Backend(String),
}

impl SourceError {
    pub fn is_cancellation(&self) -> bool {
        matches!(self, SourceError::Cancelled(_))
    }
}

/// What a source is asked to make available: a bounded range, or everything from a ledger on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerRange {
    Bounded(IngestionRange),
    Unbounded(LedgerSequence),
}

impl LedgerRange {
    pub fn from(&self) -> LedgerSequence {
        match self {
            LedgerRange::Bounded(range) => range.from(),
            LedgerRange::Unbounded(from) => *from,
        }
    }

    pub fn contains(&self, sequence: LedgerSequence) -> bool {
        match self {
            LedgerRange::Bounded(range) => range.contains(sequence),
            LedgerRange::Unbounded(from) => *from <= sequence,
        }
    }

    /// Whether every ledger of `other` is also in `self`.
    pub fn covers(&self, other: &LedgerRange) -> bool {
        match (self, other) {
            (LedgerRange::Bounded(outer), LedgerRange::Bounded(inner)) => {
                outer.contains(inner.from()) && outer.contains(inner.to())
            }
            (LedgerRange::Bounded(_), LedgerRange::Unbounded(_)) => false,
            (LedgerRange::Unbounded(from), other) => *from <= other.from(),
        }
    }
}

impl fmt::Display for LedgerRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerRange::Bounded(range) => write!(f, "{range}"),
            LedgerRange::Unbounded(from) => write!(f, "[{from}, ...)"),
        }
    }
}

/// Supplier of closed ledgers. Calls that may wait observe `cancel` and give up with
/// [`SourceError::Cancelled`] once it fires.
#[async_trait]
pub trait LedgerSource: Send + Sync {
    async fn latest_sequence(
        &self,
        cancel: &CancellationToken,
    ) -> Result<LedgerSequence, SourceError>;

    /// The ledger at `sequence`, waiting for it to close if needed. The sequence must belong to
    /// a prepared range.
    async fn fetch(
        &self,
        sequence: LedgerSequence,
        cancel: &CancellationToken,
    ) -> Result<LedgerCloseMeta, SourceError>;

    async fn prepare_range(
        &self,
        range: LedgerRange,
        cancel: &CancellationToken,
    ) -> Result<(), SourceError>;

    async fn is_prepared(&self, range: LedgerRange) -> Result<bool, SourceError>;

    async fn close(&self) -> Result<(), SourceError>;
}
