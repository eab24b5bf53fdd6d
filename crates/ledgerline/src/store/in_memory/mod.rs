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

use crate::store::{
    BatchInsert, BucketKey, DerivedState, HistoryStore, IngestionCursor, Maintenance,
    OngoingTransaction, ReapOutcome, RecordKind, Row, StoreError, TradeBucket, Transactional,
    TxOptions,
};
use async_trait::async_trait;
use ledgerline_kernel::{
    Asset, Cancelled, IngestionRange, LedgerEntryChange, LedgerSequence, StateSnapshot,
};
use parking_lot::Mutex;
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use tracing::{debug, trace};

mod tables;
use tables::{Mutation, Tables};

const EVENT_TARGET: &str = "ledgerline::store::in_memory";

// Fault injection
// ----------------------------------------------------------------------------

/// An error a [`MemoryStore`] can be told to return.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// The store's own cancellation error.
    Cancelled,
    /// The generic [`Cancelled`] marker, wrapped as an internal error.
    Interrupted,
    Failure(String),
}

impl Fault {
    pub fn to_error(&self) -> StoreError {
        match self {
            Fault::Cancelled => StoreError::Cancelled,
            Fault::Interrupted => StoreError::from(Cancelled),
            Fault::Failure(reason) => StoreError::internal(reason.clone()),
        }
    }
}

/// Faults stay in place until replaced; they are shared by every session of a store.
#[derive(Debug, Clone, Default)]
pub struct Faults {
    /// Beginning a transaction on a primary session.
    pub begin: Option<Fault>,
    /// Beginning a transaction on a session obtained through `clone_session`.
    pub clone_begin: Option<Fault>,
    pub commit: Option<Fault>,
    /// Reading the state-invalid flag.
    pub state_invalid: Option<Fault>,
    pub insert_rows: Option<Fault>,
}

/// Operation counts, shared by every session of a store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    pub begins: usize,
    pub clone_begins: usize,
    pub clones: usize,
    pub commits: usize,
    pub rollbacks: usize,
    pub state_invalid_writes: usize,
    /// Options of the last transaction begun on a cloned session.
    pub last_clone_tx: Option<TxOptions>,
}

// Store
// ----------------------------------------------------------------------------

#[derive(Default)]
struct Shared {
    tables: Mutex<Tables>,
    faults: Mutex<Faults>,
    counters: Mutex<Counters>,
}

/// Per-transaction view: a private copy of the tables and the writes to replay on commit.
struct Session {
    view: Tables,
    log: Vec<Mutation>,
}

/// An in-memory history store. Sessions share committed data; each has its own transaction.
pub struct MemoryStore {
    shared: Arc<Shared>,
    ongoing: OngoingTransaction<Session>,
    closed: AtomicBool,
    is_clone: bool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Cloning yields a fresh primary session onto the same data.
impl Clone for MemoryStore {
    fn clone(&self) -> Self {
        self.session()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_shared(Arc::new(Shared::default()), false)
    }

    fn with_shared(shared: Arc<Shared>, is_clone: bool) -> Self {
        Self {
            shared,
            ongoing: OngoingTransaction::default(),
            closed: AtomicBool::new(false),
            is_clone,
        }
    }

    /// A new primary session; unlike [`HistoryStore::clone_session`], not counted as a clone.
    pub fn session(&self) -> Self {
        Self::with_shared(self.shared.clone(), false)
    }

    /// Whether both handles are sessions of the same store.
    pub fn same_store(&self, other: &MemoryStore) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    pub fn inject(&self, configure: impl FnOnce(&mut Faults)) {
        configure(&mut *self.shared.faults.lock());
    }

    pub fn counters(&self) -> Counters {
        *self.shared.counters.lock()
    }

    /// Committed rows of a history table.
    pub fn rows(&self, kind: RecordKind) -> Vec<Row> {
        if kind.is_lookup() {
            return self.assets().into_iter().map(|asset| Row::Asset { asset }).collect();
        }
        self.shared
            .tables
            .lock()
            .history
            .get(&kind)
            .cloned()
            .unwrap_or_default()
    }

    pub fn assets(&self) -> Vec<Asset> {
        self.shared.tables.lock().assets.clone()
    }

    pub fn trade_buckets(&self) -> BTreeMap<BucketKey, TradeBucket> {
        self.shared.tables.lock().buckets.clone()
    }

    /// Committed derived state.
    pub fn committed_state(&self) -> StateSnapshot {
        let tables = self.shared.tables.lock();
        let mut state = tables.state.clone();
        state.sequence = tables.last_ingested;
        state
    }

    fn fault(&self, select: impl FnOnce(&Faults) -> &Option<Fault>) -> Result<(), StoreError> {
        match select(&*self.shared.faults.lock()) {
            Some(fault) => Err(fault.to_error()),
            None => Ok(()),
        }
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    /// Read from the open transaction's view, or from committed data outside of one.
    fn read<R>(&self, f: impl FnOnce(&Tables) -> R) -> Result<R, StoreError> {
        self.ensure_open()?;
        Ok(self.ongoing.with_state(|session| match session {
            Some(session) => f(&session.view),
            None => f(&*self.shared.tables.lock()),
        }))
    }

    /// Write into the open transaction, or straight to committed data outside of one.
    fn write(&self, mutation: Mutation) -> Result<u64, StoreError> {
        self.ensure_open()?;
        Ok(self.ongoing.with_state(|session| match session {
            Some(session) => {
                let affected = session.view.apply(&mutation);
                session.log.push(mutation);
                affected
            }
            None => self.shared.tables.lock().apply(&mutation),
        }))
    }
}

#[async_trait]
impl Transactional for MemoryStore {
    async fn begin_tx(&self, options: TxOptions) -> Result<(), StoreError> {
        self.ensure_open()?;
        {
            let mut counters = self.shared.counters.lock();
            if self.is_clone {
                counters.clone_begins += 1;
                counters.last_clone_tx = Some(options);
            } else {
                counters.begins += 1;
            }
        }

        if self.is_clone {
            self.fault(|f| &f.clone_begin)?;
        } else {
            self.fault(|f| &f.begin)?;
        }

        let view = self.shared.tables.lock().clone();
        self.ongoing.start(
            options,
            Session {
                view,
                log: Vec::new(),
            },
        )?;
        trace!(target: EVENT_TARGET, ?options, "transaction.begin");
        Ok(())
    }

    async fn commit(&self) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.fault(|f| &f.commit)?;
        let (_, session) = self.ongoing.finish()?;
        let mut tables = self.shared.tables.lock();
        for mutation in &session.log {
            tables.apply(mutation);
        }
        self.shared.counters.lock().commits += 1;
        trace!(target: EVENT_TARGET, writes = session.log.len(), "transaction.commit");
        Ok(())
    }

    async fn rollback(&self) -> Result<(), StoreError> {
        self.ensure_open()?;
        let (_, session) = self.ongoing.finish()?;
        self.shared.counters.lock().rollbacks += 1;
        trace!(target: EVENT_TARGET, writes = session.log.len(), "transaction.rollback");
        Ok(())
    }

    async fn close(&self) -> Result<(), StoreError> {
        if self.ongoing.finish().is_ok() {
            self.shared.counters.lock().rollbacks += 1;
        }
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn current_transaction(&self) -> Option<TxOptions> {
        self.ongoing.current()
    }
}

#[async_trait]
impl IngestionCursor for MemoryStore {
    async fn last_ingested_sequence(&self) -> Result<LedgerSequence, StoreError> {
        self.read(|t| t.last_ingested)
    }

    async fn set_last_ingested_sequence(
        &self,
        sequence: LedgerSequence,
    ) -> Result<(), StoreError> {
        self.write(Mutation::SetLastIngested(sequence)).map(|_| ())
    }

    async fn ingestion_format_version(&self) -> Result<u32, StoreError> {
        self.read(|t| t.version)
    }

    async fn set_ingestion_format_version(&self, version: u32) -> Result<(), StoreError> {
        self.write(Mutation::SetVersion(version)).map(|_| ())
    }

    async fn state_invalid(&self) -> Result<bool, StoreError> {
        self.fault(|f| &f.state_invalid)?;
        self.read(|t| t.state_invalid)
    }

    async fn set_state_invalid(&self, invalid: bool) -> Result<(), StoreError> {
        self.write(Mutation::SetStateInvalid(invalid))?;
        self.shared.counters.lock().state_invalid_writes += 1;
        Ok(())
    }

    async fn latest_history_ledger(&self) -> Result<LedgerSequence, StoreError> {
        self.read(Tables::latest_history_ledger)
    }

    async fn truncate_ingest_state_tables(&self) -> Result<(), StoreError> {
        let removed = self.write(Mutation::TruncateState)?;
        debug!(target: EVENT_TARGET, removed, "state.truncated");
        Ok(())
    }
}

#[async_trait]
impl BatchInsert for MemoryStore {
    async fn insert_rows(&self, kind: RecordKind, rows: Vec<Row>) -> Result<(), StoreError> {
        self.fault(|f| &f.insert_rows)?;
        self.write(Mutation::InsertRows(kind, rows)).map(|_| ())
    }
}

#[async_trait]
impl Maintenance for MemoryStore {
    async fn reap_lookup_tables(
        &self,
        offset: u64,
        batch_size: usize,
    ) -> Result<ReapOutcome, StoreError> {
        let (unreferenced, scanned, total) = self.read(|t| {
            let referenced = t.referenced_assets();
            let start = usize::try_from(offset).unwrap_or(usize::MAX).min(t.assets.len());
            let window = &t.assets[start..];
            let window = &window[..batch_size.min(window.len())];
            let unreferenced: BTreeSet<Asset> = window
                .iter()
                .filter(|asset| !referenced.contains(asset))
                .cloned()
                .collect();
            (unreferenced, start + window.len(), t.assets.len())
        })?;

        let deleted = if unreferenced.is_empty() {
            0
        } else {
            self.write(Mutation::DeleteAssets(unreferenced))?
        };

        let next_offset = if scanned >= total {
            0
        } else {
            scanned as u64 - deleted
        };

        Ok(ReapOutcome {
            deleted,
            next_offset,
        })
    }

    async fn rebuild_trade_aggregation_buckets(
        &self,
        range: IngestionRange,
        slippage_filter: u32,
    ) -> Result<(), StoreError> {
        let buckets = self.read(|t| t.aggregate_trades(range, slippage_filter))?;
        self.write(Mutation::ReplaceBuckets(range, buckets))?;
        Ok(())
    }

    async fn delete_filtered_tmp_older_than(&self, cutoff: u64) -> Result<u64, StoreError> {
        self.write(Mutation::DeleteFilteredBefore(cutoff))
    }

    async fn delete_range_all(&self, range: IngestionRange) -> Result<u64, StoreError> {
        self.write(Mutation::DeleteRange(range))
    }
}

#[async_trait]
impl DerivedState for MemoryStore {
    async fn apply_entry_changes(&self, changes: &[LedgerEntryChange]) -> Result<(), StoreError> {
        self.write(Mutation::ApplyChanges(changes.to_vec()))
            .map(|_| ())
    }

    async fn derived_snapshot(&self) -> Result<StateSnapshot, StoreError> {
        self.read(|t| {
            let mut state = t.state.clone();
            state.sequence = t.last_ingested;
            state
        })
    }
}

impl HistoryStore for MemoryStore {
    fn clone_session(&self) -> Box<dyn HistoryStore> {
        self.shared.counters.lock().clones += 1;
        Box::new(Self::with_shared(self.shared.clone(), true))
    }
}
