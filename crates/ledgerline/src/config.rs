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

use crate::{
    archive::{HistoryArchive, MemoryArchive},
    cursor::CursorReporter,
    source::{LedgerSource, MemoryLedgerSource},
    store::{in_memory::MemoryStore, HistoryStore, DEFAULT_MAX_BATCH_SIZE},
};
use checkpoint_arithmetic::DEFAULT_CHECKPOINT_FREQUENCY;
use std::{fmt, sync::Arc, time::Duration};

/// Where history is stored.
#[derive(Clone)]
pub enum StoreType {
    InMem(MemoryStore),
    /// Any other backend; the system works on its own session of it.
    Shared(Arc<dyn HistoryStore>),
}

impl StoreType {
    /// A fresh primary session onto the store.
    pub(crate) fn open(&self) -> Box<dyn HistoryStore> {
        match self {
            StoreType::InMem(store) => Box::new(store.session()),
            StoreType::Shared(store) => store.clone_session(),
        }
    }

    fn same_store(&self, other: &StoreType) -> bool {
        match (self, other) {
            (StoreType::InMem(a), StoreType::InMem(b)) => a.same_store(b),
            (StoreType::Shared(a), StoreType::Shared(b)) => Arc::ptr_eq(a, b),
            (StoreType::InMem(_), StoreType::Shared(_))
            | (StoreType::Shared(_), StoreType::InMem(_)) => false,
        }
    }
}

impl fmt::Display for StoreType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreType::InMem(..) => write!(f, "<mem>"),
            StoreType::Shared(..) => write!(f, "<shared>"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RunMode {
    /// Follow the source forever, one ledger at a time.
    #[default]
    Live,
    /// Ingest whatever the source has, then stop.
    CatchUp,
}

/// How an empty or stale store gets its initial state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Bootstrap {
    #[default]
    Genesis,
    LatestCheckpoint,
}

#[derive(Clone)]
pub struct CursorConfig {
    pub name: String,
    pub reporter: Arc<dyn CursorReporter>,
}

#[derive(Clone)]
pub struct Config {
    pub store: StoreType,
    pub ledger_source: Arc<dyn LedgerSource>,
    pub history_archive: Arc<dyn HistoryArchive>,
    pub checkpoint_frequency: u32,
    pub disable_state_verification: bool,
    pub mode: RunMode,
    pub bootstrap: Bootstrap,
    pub cursor: Option<CursorConfig>,
    /// Reap unreferenced lookup rows and stale filtered transactions after each checkpoint.
    pub reap_lookup_tables: bool,
    pub reap_batch_size: usize,
    /// In basis points; `0` disables the filter.
    pub trade_aggregation_slippage_filter: u32,
    pub max_batch_size: usize,
    pub filtered_tmp_retention: Duration,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            store: StoreType::InMem(MemoryStore::new()),
            ledger_source: Arc::new(MemoryLedgerSource::new()),
            history_archive: Arc::new(MemoryArchive::default()),
            checkpoint_frequency: DEFAULT_CHECKPOINT_FREQUENCY,
            disable_state_verification: false,
            mode: RunMode::default(),
            bootstrap: Bootstrap::default(),
            cursor: None,
            reap_lookup_tables: false,
            reap_batch_size: 1_000,
            trade_aggregation_slippage_filter: 1_000,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            filtered_tmp_retention: Duration::from_secs(30 * 60),
        }
    }
}

/// Two configurations are equal when their settings match and they point to the very same
/// collaborators.
impl PartialEq for Config {
    fn eq(&self, other: &Self) -> bool {
        let same_cursor = match (&self.cursor, &other.cursor) {
            (None, None) => true,
            (Some(a), Some(b)) => a.name == b.name && Arc::ptr_eq(&a.reporter, &b.reporter),
            (None, Some(_)) | (Some(_), None) => false,
        };

        same_cursor
            && self.store.same_store(&other.store)
            && Arc::ptr_eq(&self.ledger_source, &other.ledger_source)
            && Arc::ptr_eq(&self.history_archive, &other.history_archive)
            && self.checkpoint_frequency == other.checkpoint_frequency
            && self.disable_state_verification == other.disable_state_verification
            && self.mode == other.mode
            && self.bootstrap == other.bootstrap
            && self.reap_lookup_tables == other.reap_lookup_tables
            && self.reap_batch_size == other.reap_batch_size
            && self.trade_aggregation_slippage_filter == other.trade_aggregation_slippage_filter
            && self.max_batch_size == other.max_batch_size
            && self.filtered_tmp_retention == other.filtered_tmp_retention
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("store", &self.store.to_string())
            .field("checkpoint_frequency", &self.checkpoint_frequency)
            .field("disable_state_verification", &self.disable_state_verification)
            .field("mode", &self.mode)
            .field("bootstrap", &self.bootstrap)
            .field("cursor", &self.cursor.as_ref().map(|c| c.name.as_str()))
            .field("reap_lookup_tables", &self.reap_lookup_tables)
            .field("reap_batch_size", &self.reap_batch_size)
            .field(
                "trade_aggregation_slippage_filter",
                &self.trade_aggregation_slippage_filter,
            )
            .field("max_batch_size", &self.max_batch_size)
            .field("filtered_tmp_retention", &self.filtered_tmp_retention)
            .finish_non_exhaustive()
    }
}
