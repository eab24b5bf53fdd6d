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

//! The composition root: a [`System`] owns the main store session, the processor runner, the
//! cancellation scope and the background verifications, and drives the ingestion state machine.

use crate::{
    archive::ArchiveError,
    config::Config,
    metrics::{IngestionMetrics, MetricsSnapshot},
    processors::{DefaultProcessorRunner, ProcessorError},
    source::SourceError,
    store::{HistoryStore, StoreError},
};
use checkpoint_arithmetic::CheckpointManager;
use ledgerline_kernel::{IngestionRange, InvalidRange, LedgerSequence};
use opentelemetry::metrics::Meter;
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};
use thiserror::Error;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, error, warn};

pub mod state;
pub use state::State;

pub mod verify;
pub use verify::{Verdict, VerifyError};

const EVENT_TARGET: &str = "ledgerline::ingest";

/// Version of the derived data layout. Bumping it makes every existing store stale, forcing a
/// rebuild before incremental ingestion resumes.
pub const CURRENT_INGESTION_VERSION: u32 = 3;

/// The ingestion version the state verifier knows how to check. Must follow
/// [`CURRENT_INGESTION_VERSION`].
pub const STATE_VERIFIER_EXPECTED_INGESTION_VERSION: u32 = 3;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error(transparent)]
    InvalidRange(#[from] InvalidRange),
    #[error("database not empty")]
    DatabaseNotEmpty,
    #[error("invalid stress test parameters")]
    InvalidStressTest,
    #[error("range {range} reaches the last ingested ledger {last_ingested}")]
    ReingestRangeConflict {
        range: IngestionRange,
        last_ingested: LedgerSequence,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error(transparent)]
    Processor(#[from] ProcessorError),
    #[error(transparent)]
    Verify(#[from] VerifyError),
}

impl IngestError {
    pub fn is_cancellation(&self) -> bool {
        match self {
            IngestError::Store(e) => e.is_cancellation(),
            IngestError::Source(e) => e.is_cancellation(),
            IngestError::Archive(e) => e.is_cancellation(),
            IngestError::Processor(e) => e.is_cancellation(),
            IngestError::Verify(e) => e.is_cancellation(),
            IngestError::InvalidRange(..)
            | IngestError::DatabaseNotEmpty
            | IngestError::InvalidStressTest
            | IngestError::ReingestRangeConflict { .. } => false,
        }
    }
}

pub struct System {
    config: Config,
    store: Box<dyn HistoryStore>,
    runner: DefaultProcessorRunner,
    checkpoints: CheckpointManager,
    cancel: CancellationToken,
    tracker: TaskTracker,
    metrics: Arc<IngestionMetrics>,
    verification_in_flight: Arc<AtomicBool>,
    /// Where the next lookup-table reaping pass resumes.
    reap_offset: AtomicU64,
}

impl System {
    pub fn new(config: Config) -> Self {
        let cancel = CancellationToken::new();
        Self {
            store: config.store.open(),
            runner: DefaultProcessorRunner::new(config.clone(), cancel.clone()),
            checkpoints: CheckpointManager::new(config.checkpoint_frequency),
            cancel,
            tracker: TaskTracker::new(),
            metrics: Arc::new(IngestionMetrics::default()),
            verification_in_flight: Arc::new(AtomicBool::new(false)),
            reap_offset: AtomicU64::new(0),
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The main store session, used by the state machine.
    pub fn store(&self) -> &dyn HistoryStore {
        &*self.store
    }

    pub fn processor_runner(&self) -> &DefaultProcessorRunner {
        &self.runner
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn checkpoints(&self) -> &CheckpointManager {
        &self.checkpoints
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn register_metrics(&self, meter: &Meter) {
        self.metrics.snapshot().record_to_meter(meter);
    }

    /// Ingest until shut down, or until caught up in [`crate::RunMode::CatchUp`].
    pub async fn run(&self) -> Result<(), IngestError> {
        state::run(self, State::Start).await
    }

    /// Rebuild state on an empty store from the checkpoint at `from`, ingest up to `to`, and
    /// optionally check the resulting state against the history archive.
    pub async fn verify_range(
        &self,
        from: LedgerSequence,
        to: LedgerSequence,
        verify_state: bool,
    ) -> Result<(), IngestError> {
        state::run(
            self,
            State::VerifyRange {
                from,
                to,
                verify_state,
            },
        )
        .await
    }

    /// Re-apply the transaction processors to already ingested ledgers, one range after the
    /// other in increasing order.
    pub async fn reingest_range(
        &self,
        ranges: &[IngestionRange],
        force: bool,
    ) -> Result<(), IngestError> {
        let mut ranges = ranges.to_vec();
        ranges.sort_by_key(|range| range.from());
        for range in ranges {
            state::run(self, State::ReingestHistoryRange { range, force }).await?;
            if self.cancel.is_cancelled() {
                break;
            }
        }
        Ok(())
    }

    pub async fn build_genesis_state(&self) -> Result<(), IngestError> {
        state::run(self, State::BuildGenesis { stop: true }).await
    }

    /// Process a synthetic ledger on top of the current state, without keeping any of it.
    pub async fn stress_test(
        &self,
        transactions: u32,
        changes_per_transaction: u32,
    ) -> Result<(), IngestError> {
        state::run(
            self,
            State::StressTest {
                transactions,
                changes_per_transaction,
            },
        )
        .await
    }

    /// Cancel everything in progress and wait for background verifications to drain.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        if let Err(e) = self.config.ledger_source.close().await {
            warn!(target: EVENT_TARGET, reason = %e, "source.close_failed");
        }
    }

    /// Wait for the verifications spawned so far; new ones may be spawned afterwards.
    pub async fn wait_for_verifications(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        if !self.cancel.is_cancelled() {
            self.tracker.reopen();
        }
    }

    pub fn verification_in_flight(&self) -> bool {
        self.verification_in_flight.load(Ordering::SeqCst)
    }

    /// Verify the state at checkpoint `sequence` in the background, unless verification is
    /// disabled, the scope is cancelled, the state is already known to be invalid (and `force`
    /// is not set), or another verification is running.
    pub async fn maybe_verify_state(&self, sequence: LedgerSequence, force: bool) {
        if self.config.disable_state_verification || self.cancel.is_cancelled() {
            return;
        }

        let invalid = match self.store.state_invalid().await {
            Ok(invalid) => invalid,
            Err(e) if e.is_cancellation() => return,
            Err(e) => {
                error!(target: EVENT_TARGET, reason = %e, "state.flag_unreadable");
                return;
            }
        };

        if invalid && !force {
            debug!(target: EVENT_TARGET, %sequence, "state.already_invalid");
            return;
        }

        if self
            .verification_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!(target: EVENT_TARGET, %sequence, "state.verification_in_flight");
            return;
        }

        let task = verify::VerificationTask {
            store: self.store.clone_session(),
            archive: self.config.history_archive.clone(),
            cancel: self.cancel.clone(),
            metrics: self.metrics.clone(),
            in_flight: self.verification_in_flight.clone(),
            sequence,
        };
        self.tracker.spawn(task.run());
    }

    fn next_reap_offset(&self) -> u64 {
        self.reap_offset.load(Ordering::SeqCst)
    }

    fn set_next_reap_offset(&self, offset: u64) {
        self.reap_offset.store(offset, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verifier_follows_the_ingestion_version() {
        assert_eq!(
            CURRENT_INGESTION_VERSION,
            STATE_VERIFIER_EXPECTED_INGESTION_VERSION
        );
    }

    #[test]
    fn invalid_range_message() {
        let err = IngestError::from(IngestionRange::new(0u32, 0u32).unwrap_err());
        assert_eq!(err.to_string(), "invalid range: [0, 0]");
        assert!(!err.is_cancellation());
    }

    #[test]
    fn runner_shares_configuration_and_scope() {
        let config = Config {
            disable_state_verification: true,
            ..Config::default()
        };
        let system = System::new(config.clone());

        assert!(system.config().disable_state_verification);
        assert_eq!(system.config(), &config);
        assert_eq!(system.processor_runner().config(), system.config());

        system.cancellation().cancel();
        assert!(system.processor_runner().cancellation().is_cancelled());
    }

    #[tokio::test]
    async fn waiting_after_shutdown_keeps_the_tracker_closed() {
        let system = System::new(Config::default());
        system.shutdown().await;

        system.wait_for_verifications().await;

        assert!(system.tracker.is_closed());
    }
}
