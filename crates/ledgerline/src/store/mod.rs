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
use ledgerline_kernel::{
    Cancelled, IngestionRange, LedgerEntryChange, LedgerSequence, StateSnapshot,
};
use thiserror::Error;

pub mod in_memory;

mod records;
pub use records::{
    BatchInsertBuilder, BucketKey, EffectKind, RecordKind, Row, TradeBucket,
    DEFAULT_MAX_BATCH_SIZE,
};

mod transaction;
pub use transaction::OngoingTransaction;

#[derive(Error, Debug)]
pub enum StoreError {
    /// The store gave up on a statement because its session was cancelled.
    #[error("store operation cancelled")]
    Cancelled,
    #[error("no transaction in progress")]
    NoTransaction,
    #[error("a transaction is already in progress")]
    TransactionInProgress,
    #[error("store session is closed")]
    Closed,
    #[error(transparent)]
    Internal(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl StoreError {
    pub fn internal(reason: impl Into<String>) -> Self {
        StoreError::Internal(reason.into().into())
    }

    /// Both the store's own cancellation and a wrapped [`Cancelled`] count as cancellation.
    pub fn is_cancellation(&self) -> bool {
        match self {
            StoreError::Cancelled => true,
            StoreError::Internal(e) => e.downcast_ref::<Cancelled>().is_some(),
            StoreError::NoTransaction | StoreError::TransactionInProgress | StoreError::Closed => {
                false
            }
        }
    }
}

impl From<Cancelled> for StoreError {
    fn from(cancelled: Cancelled) -> Self {
        StoreError::Internal(Box::new(cancelled))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IsolationLevel {
    #[default]
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxOptions {
    pub isolation: IsolationLevel,
    pub read_only: bool,
}

impl TxOptions {
    /// Read-write transaction seeing a single consistent snapshot for its whole duration.
    pub fn repeatable_read() -> Self {
        Self {
            isolation: IsolationLevel::RepeatableRead,
            read_only: false,
        }
    }
}

// Store contracts
// ----------------------------------------------------------------------------

#[async_trait]
pub trait Transactional: Send + Sync {
    async fn begin(&self) -> Result<(), StoreError> {
        self.begin_tx(TxOptions::default()).await
    }

    async fn begin_tx(&self, options: TxOptions) -> Result<(), StoreError>;

    async fn commit(&self) -> Result<(), StoreError>;

    async fn rollback(&self) -> Result<(), StoreError>;

    /// Release the session. Any open transaction is rolled back.
    async fn close(&self) -> Result<(), StoreError>;

    /// Options of the transaction currently open on this handle, if any.
    fn current_transaction(&self) -> Option<TxOptions>;
}

/// Bookkeeping of where ingestion stands. Reads outside of a transaction see committed data.
#[async_trait]
pub trait IngestionCursor: Send + Sync {
    async fn last_ingested_sequence(&self) -> Result<LedgerSequence, StoreError>;

    async fn set_last_ingested_sequence(&self, sequence: LedgerSequence)
        -> Result<(), StoreError>;

    async fn ingestion_format_version(&self) -> Result<u32, StoreError>;

    async fn set_ingestion_format_version(&self, version: u32) -> Result<(), StoreError>;

    async fn state_invalid(&self) -> Result<bool, StoreError>;

    async fn set_state_invalid(&self, invalid: bool) -> Result<(), StoreError>;

    /// Highest ledger with rows in the history tables, `0` when there are none.
    async fn latest_history_ledger(&self) -> Result<LedgerSequence, StoreError>;

    /// Empty every derived-state table; history tables are left alone.
    async fn truncate_ingest_state_tables(&self) -> Result<(), StoreError>;
}

#[async_trait]
pub trait BatchInsert: Send + Sync {
    /// Insert rows of a single kind. Lookup rows (assets) are upserted.
    async fn insert_rows(&self, kind: RecordKind, rows: Vec<Row>) -> Result<(), StoreError>;
}

/// Outcome of one lookup-table reaping pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReapOutcome {
    pub deleted: u64,
    /// Where the next pass should resume; `0` once the table has been fully scanned.
    pub next_offset: u64,
}

#[async_trait]
pub trait Maintenance: Send + Sync {
    /// Scan up to `batch_size` lookup rows from `offset`, deleting the unreferenced ones.
    async fn reap_lookup_tables(
        &self,
        offset: u64,
        batch_size: usize,
    ) -> Result<ReapOutcome, StoreError>;

    /// Recompute trade buckets of the range, ignoring trades whose rounding slippage (in basis
    /// points) exceeds `slippage_filter`. A filter of `0` keeps every trade.
    async fn rebuild_trade_aggregation_buckets(
        &self,
        range: IngestionRange,
        slippage_filter: u32,
    ) -> Result<(), StoreError>;

    /// Delete filtered-out transactions closed before `cutoff` (seconds since the unix epoch).
    async fn delete_filtered_tmp_older_than(&self, cutoff: u64) -> Result<u64, StoreError>;

    /// Delete every history row attached to a ledger of the range.
    async fn delete_range_all(&self, range: IngestionRange) -> Result<u64, StoreError>;
}

#[async_trait]
pub trait DerivedState: Send + Sync {
    async fn apply_entry_changes(&self, changes: &[LedgerEntryChange]) -> Result<(), StoreError>;

    /// The whole derived state, tagged with the last ingested sequence.
    async fn derived_snapshot(&self) -> Result<StateSnapshot, StoreError>;
}

/// A session onto the history store.
pub trait HistoryStore:
    Transactional + IngestionCursor + BatchInsert + Maintenance + DerivedState
{
    /// An independent session onto the same data, with its own transaction state.
    fn clone_session(&self) -> Box<dyn HistoryStore>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_cancellations_are_recognised() {
        assert!(StoreError::Cancelled.is_cancellation());
        assert!(StoreError::from(Cancelled).is_cancellation());
        assert!(!StoreError::internal("disk full").is_cancellation());
        assert!(!StoreError::Closed.is_cancellation());
    }
}
