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

//! Turn ledgers (and checkpoint states) into derived state and history rows.

use crate::{
    archive::ArchiveError,
    store::{HistoryStore, StoreError},
    Config,
};
use async_trait::async_trait;
use ledgerline_kernel::{
    AccountEntry, AccountId, Cancelled, Hash, LedgerCloseMeta, LedgerEntry, LedgerEntryChange,
    LedgerSequence,
};
use std::time::Instant;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, Level};

mod stats;
pub use stats::{ChangeStats, LedgerStats, TradeStats, TransactionStats};

mod transactions;
pub use transactions::operation_kind;

const EVENT_TARGET: &str = "ledgerline::processors";

/// The account holding every lumen at genesis.
pub const ROOT_ACCOUNT: &str = "GAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAWHF";

pub const GENESIS_BALANCE: i64 = 1_000_000_000_000_000_000;

#[derive(Error, Debug)]
pub enum ProcessorError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
    #[error("archive returned the state of ledger {found} for checkpoint {checkpoint}")]
    UnexpectedSnapshot {
        checkpoint: LedgerSequence,
        found: LedgerSequence,
    },
}

impl ProcessorError {
    pub fn is_cancellation(&self) -> bool {
        match self {
            ProcessorError::Store(e) => e.is_cancellation(),
            ProcessorError::Archive(e) => e.is_cancellation(),
            ProcessorError::Cancelled(_) => true,
            ProcessorError::UnexpectedSnapshot { .. } => false,
        }
    }
}

/// Runs the transformation pipeline against a store session. Every method expects the caller to
/// own an open transaction on `store`.
#[async_trait]
pub trait ProcessorRunner: Send + Sync {
    async fn run_genesis(&self, store: &dyn HistoryStore) -> Result<ChangeStats, ProcessorError>;

    /// Load the full state published by the history archive at `checkpoint`.
    async fn run_checkpoint(
        &self,
        store: &dyn HistoryStore,
        checkpoint: LedgerSequence,
        protocol_version: u32,
        state_hash: Hash,
    ) -> Result<ChangeStats, ProcessorError>;

    /// State changes and history rows of a ledger.
    async fn run_all_processors(
        &self,
        store: &dyn HistoryStore,
        ledger: &LedgerCloseMeta,
    ) -> Result<LedgerStats, ProcessorError>;

    /// Derived state only, for ledgers whose history rows are already stored.
    async fn run_change_processors(
        &self,
        store: &dyn HistoryStore,
        ledger: &LedgerCloseMeta,
    ) -> Result<LedgerStats, ProcessorError>;

    /// History rows only; derived state is left untouched.
    async fn run_transaction_processors(
        &self,
        store: &dyn HistoryStore,
        ledger: &LedgerCloseMeta,
    ) -> Result<LedgerStats, ProcessorError>;
}

#[derive(Debug, Clone)]
pub struct DefaultProcessorRunner {
    config: Config,
    cancel: CancellationToken,
}

impl DefaultProcessorRunner {
    pub fn new(config: Config, cancel: CancellationToken) -> Self {
        Self { config, cancel }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    fn ensure_running(&self) -> Result<(), Cancelled> {
        if self.cancel.is_cancelled() {
            return Err(Cancelled);
        }
        Ok(())
    }

    async fn apply_changes(
        &self,
        store: &dyn HistoryStore,
        changes: Vec<LedgerEntryChange>,
    ) -> Result<ChangeStats, ProcessorError> {
        self.ensure_running()?;
        let mut stats = ChangeStats::default();
        changes.iter().for_each(|change| stats.record(change));
        store.apply_entry_changes(&changes).await?;
        Ok(stats)
    }

    async fn process_transactions(
        &self,
        store: &dyn HistoryStore,
        ledger: &LedgerCloseMeta,
        stats: &mut LedgerStats,
    ) -> Result<(), ProcessorError> {
        let start = Instant::now();
        let (transactions, trades) = transactions::write_transaction_rows(
            store,
            ledger,
            self.config.max_batch_size,
            &self.cancel,
        )
        .await?;
        stats.transactions = transactions;
        stats.trades = trades;
        stats.durations.insert("transactions", start.elapsed());
        Ok(())
    }
}

#[async_trait]
impl ProcessorRunner for DefaultProcessorRunner {
    #[instrument(level = Level::DEBUG, target = EVENT_TARGET, name = "processors.genesis", skip_all)]
    async fn run_genesis(&self, store: &dyn HistoryStore) -> Result<ChangeStats, ProcessorError> {
        let root = LedgerEntry::Account(AccountEntry {
            account_id: AccountId::from(ROOT_ACCOUNT),
            balance: GENESIS_BALANCE,
            sequence: 0,
            num_subentries: 0,
        });
        self.apply_changes(store, vec![LedgerEntryChange::Created(root)])
            .await
    }

    #[instrument(
        level = Level::DEBUG,
        target = EVENT_TARGET,
        name = "processors.checkpoint",
        skip_all,
        fields(%checkpoint, protocol_version, %state_hash),
    )]
    async fn run_checkpoint(
        &self,
        store: &dyn HistoryStore,
        checkpoint: LedgerSequence,
        protocol_version: u32,
        state_hash: Hash,
    ) -> Result<ChangeStats, ProcessorError> {
        self.ensure_running()?;
        let snapshot = self
            .config
            .history_archive
            .state_at(checkpoint, &self.cancel)
            .await?;

        if snapshot.sequence != checkpoint {
            return Err(ProcessorError::UnexpectedSnapshot {
                checkpoint,
                found: snapshot.sequence,
            });
        }

        let changes = snapshot
            .entries()
            .map(|entry| LedgerEntryChange::Created(entry.clone()))
            .collect();
        let stats = self.apply_changes(store, changes).await?;
        debug!(target: EVENT_TARGET, entries = stats.created, "checkpoint.loaded");
        Ok(stats)
    }

    async fn run_all_processors(
        &self,
        store: &dyn HistoryStore,
        ledger: &LedgerCloseMeta,
    ) -> Result<LedgerStats, ProcessorError> {
        let mut stats = self.run_change_processors(store, ledger).await?;
        self.process_transactions(store, ledger, &mut stats).await?;
        Ok(stats)
    }

    async fn run_change_processors(
        &self,
        store: &dyn HistoryStore,
        ledger: &LedgerCloseMeta,
    ) -> Result<LedgerStats, ProcessorError> {
        let mut stats = LedgerStats::default();
        let start = Instant::now();
        stats.changes = self
            .apply_changes(store, ledger.changes().cloned().collect())
            .await?;
        stats.durations.insert("changes", start.elapsed());
        Ok(stats)
    }

    async fn run_transaction_processors(
        &self,
        store: &dyn HistoryStore,
        ledger: &LedgerCloseMeta,
    ) -> Result<LedgerStats, ProcessorError> {
        let mut stats = LedgerStats::default();
        self.process_transactions(store, ledger, &mut stats).await?;
        Ok(stats)
    }
}
