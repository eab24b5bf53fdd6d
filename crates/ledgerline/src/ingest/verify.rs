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

//! Checking the derived state held by the store against the reference state published by the
//! history archive at checkpoints.

use super::STATE_VERIFIER_EXPECTED_INGESTION_VERSION;
use crate::{
    archive::{ArchiveError, HistoryArchive},
    metrics::IngestionMetrics,
    store::{HistoryStore, StoreError, TxOptions},
};
use ledgerline_kernel::{Cancelled, Discrepancy, LedgerSequence};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Instant,
};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn, Level};

const EVENT_TARGET: &str = "ledgerline::ingest::verify";

/// Discrepancies listed individually in a mismatch report; the rest are only counted.
const MAX_REPORTED_DISCREPANCIES: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Match,
    Mismatch { discrepancies: Vec<Discrepancy> },
    /// The store moved past the checkpoint before the verification could look at it.
    Skipped,
}

#[derive(Error, Debug)]
pub enum VerifyError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error("ledger {0} is not a checkpoint")]
    NotACheckpoint(LedgerSequence),
    #[error("state verifier expects ingestion version {expected}, store is at version {found}")]
    UnexpectedVersion { expected: u32, found: u32 },
    #[error("state at ledger {sequence} differs from the history archive ({} discrepancies)", .discrepancies.len())]
    Mismatch {
        sequence: LedgerSequence,
        discrepancies: Vec<Discrepancy>,
    },
}

impl VerifyError {
    pub fn is_cancellation(&self) -> bool {
        match self {
            VerifyError::Store(e) => e.is_cancellation(),
            VerifyError::Archive(e) => e.is_cancellation(),
            VerifyError::NotACheckpoint(..)
            | VerifyError::UnexpectedVersion { .. }
            | VerifyError::Mismatch { .. } => false,
        }
    }
}

/// Verify the state at `sequence` in a repeatable-read transaction of its own on `store`,
/// persisting the outcome in the state-invalid flag.
#[instrument(
    level = Level::DEBUG,
    target = EVENT_TARGET,
    name = "state.verify",
    skip_all,
    fields(%sequence),
)]
pub async fn verify_state(
    store: &dyn HistoryStore,
    archive: &dyn HistoryArchive,
    sequence: LedgerSequence,
    cancel: &CancellationToken,
) -> Result<Verdict, VerifyError> {
    if cancel.is_cancelled() {
        return Err(StoreError::from(Cancelled).into());
    }

    if let Err(e) = store.begin_tx(TxOptions::repeatable_read()).await {
        if e.is_cancellation() {
            store.rollback().await.ok();
        }
        return Err(e.into());
    }

    match check(store, archive, sequence, cancel).await {
        Ok(verdict) => {
            if let Err(e) = store.commit().await {
                store.rollback().await.ok();
                return Err(e.into());
            }
            Ok(verdict)
        }
        Err(e) => {
            store.rollback().await.ok();
            Err(e)
        }
    }
}

async fn check(
    store: &dyn HistoryStore,
    archive: &dyn HistoryArchive,
    sequence: LedgerSequence,
    cancel: &CancellationToken,
) -> Result<Verdict, VerifyError> {
    let found = store.ingestion_format_version().await?;
    if found != STATE_VERIFIER_EXPECTED_INGESTION_VERSION {
        return Err(VerifyError::UnexpectedVersion {
            expected: STATE_VERIFIER_EXPECTED_INGESTION_VERSION,
            found,
        });
    }

    let cursor = store.last_ingested_sequence().await?;
    if cursor != sequence {
        debug!(target: EVENT_TARGET, %cursor, "verification.skipped");
        return Ok(Verdict::Skipped);
    }

    let derived = store.derived_snapshot().await?;
    let reference = archive.state_at(sequence, cancel).await?;
    let discrepancies = derived.diff(&reference);

    if discrepancies.is_empty() {
        if store.state_invalid().await? {
            store.set_state_invalid(false).await?;
            info!(target: EVENT_TARGET, %sequence, "state.valid_again");
        }
        return Ok(Verdict::Match);
    }

    store.set_state_invalid(true).await?;
    report(sequence, &discrepancies);
    Ok(Verdict::Mismatch { discrepancies })
}

fn report(sequence: LedgerSequence, discrepancies: &[Discrepancy]) {
    error!(
        target: EVENT_TARGET,
        %sequence,
        discrepancies = discrepancies.len(),
        "state.mismatch"
    );
    for discrepancy in discrepancies.iter().take(MAX_REPORTED_DISCREPANCIES) {
        warn!(target: EVENT_TARGET, %discrepancy, "state.discrepancy");
    }
}

/// A verification running in the background, on its own store session.
pub(crate) struct VerificationTask {
    pub store: Box<dyn HistoryStore>,
    pub archive: Arc<dyn HistoryArchive>,
    pub cancel: CancellationToken,
    pub metrics: Arc<IngestionMetrics>,
    pub in_flight: Arc<AtomicBool>,
    pub sequence: LedgerSequence,
}

impl VerificationTask {
    pub(crate) async fn run(self) {
        let started = Instant::now();
        let outcome = verify_state(&*self.store, &*self.archive, self.sequence, &self.cancel).await;

        // Releasing the session also rolls back anything left open by a failed commit.
        self.store.close().await.ok();

        match outcome {
            Ok(Verdict::Match) => {
                self.metrics.record_verification(true, started.elapsed());
                info!(target: EVENT_TARGET, sequence = %self.sequence, "state.verified");
            }
            Ok(Verdict::Mismatch { .. }) => {
                self.metrics.record_verification(false, started.elapsed());
            }
            Ok(Verdict::Skipped) => {}
            Err(e) if e.is_cancellation() => {}
            Err(e) => {
                error!(
                    target: EVENT_TARGET,
                    sequence = %self.sequence,
                    reason = %e,
                    "state.verification_failed"
                );
            }
        }

        self.in_flight.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        archive::MemoryArchive,
        store::{in_memory::MemoryStore, DerivedState, IngestionCursor, Transactional},
    };
    use ledgerline_kernel::{
        AccountEntry, AccountId, LedgerEntry, LedgerEntryChange, StateSnapshot,
    };

    fn account(id: &str, balance: i64) -> LedgerEntry {
        LedgerEntry::Account(AccountEntry {
            account_id: AccountId::from(id),
            balance,
            sequence: 1,
            num_subentries: 0,
        })
    }

    async fn store_at(sequence: u32, entries: Vec<LedgerEntry>) -> MemoryStore {
        let store = MemoryStore::new();
        store
            .set_ingestion_format_version(STATE_VERIFIER_EXPECTED_INGESTION_VERSION)
            .await
            .unwrap();
        store
            .set_last_ingested_sequence(LedgerSequence::new(sequence))
            .await
            .unwrap();
        let changes: Vec<_> = entries.into_iter().map(LedgerEntryChange::Created).collect();
        store.apply_entry_changes(&changes).await.unwrap();
        store
    }

    fn never() -> CancellationToken {
        CancellationToken::new()
    }

    fn archive_with(sequence: u32, entries: Vec<LedgerEntry>) -> MemoryArchive {
        let archive = MemoryArchive::default();
        archive
            .publish(StateSnapshot::from_entries(LedgerSequence::new(sequence), entries))
            .unwrap();
        archive
    }

    #[tokio::test]
    async fn matching_state_clears_the_flag() {
        let store = store_at(63, vec![account("GALICE", 10)]).await;
        store.set_state_invalid(true).await.unwrap();
        let archive = archive_with(63, vec![account("GALICE", 10)]);

        let verdict = verify_state(&store, &archive, LedgerSequence::new(63), &never())
            .await
            .unwrap();

        assert_eq!(verdict, Verdict::Match);
        assert!(!store.state_invalid().await.unwrap());
        assert!(store.current_transaction().is_none());
    }

    #[tokio::test]
    async fn mismatch_sets_the_flag() {
        let store = store_at(63, vec![account("GALICE", 10)]).await;
        let archive = archive_with(63, vec![account("GALICE", 11)]);

        let verdict = verify_state(&store, &archive, LedgerSequence::new(63), &never())
            .await
            .unwrap();

        assert!(matches!(
            verdict,
            Verdict::Mismatch { ref discrepancies } if discrepancies.len() == 1
        ));
        assert!(store.state_invalid().await.unwrap());
    }

    #[tokio::test]
    async fn stale_checkpoints_are_skipped() {
        let store = store_at(70, vec![]).await;
        let archive = archive_with(63, vec![]);

        let verdict = verify_state(&store, &archive, LedgerSequence::new(63), &never())
            .await
            .unwrap();

        assert_eq!(verdict, Verdict::Skipped);
        assert_eq!(store.counters().state_invalid_writes, 0);
    }

    #[tokio::test]
    async fn cancelled_scope_opens_no_transaction() {
        let store = store_at(63, vec![account("GALICE", 10)]).await;
        let archive = archive_with(63, vec![account("GALICE", 11)]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = verify_state(&store, &archive, LedgerSequence::new(63), &cancel)
            .await
            .unwrap_err();

        assert!(err.is_cancellation());
        assert_eq!(store.counters().begins, 0);
        assert!(!store.state_invalid().await.unwrap());
    }

    #[tokio::test]
    async fn old_ingestion_versions_are_refused() {
        let store = store_at(63, vec![]).await;
        store.set_ingestion_format_version(1).await.unwrap();
        let archive = archive_with(63, vec![]);

        let err = verify_state(&store, &archive, LedgerSequence::new(63), &never())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            VerifyError::UnexpectedVersion { found: 1, .. }
        ));
        assert!(store.current_transaction().is_none());
    }
}
