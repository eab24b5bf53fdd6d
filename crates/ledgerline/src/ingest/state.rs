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

use super::{
    verify::{self, Verdict, VerifyError},
    IngestError, System, CURRENT_INGESTION_VERSION,
};
use crate::{
    config::{Bootstrap, RunMode},
    processors::{LedgerStats, ProcessorRunner},
    source::LedgerRange,
    store::HistoryStore,
};
use ledgerline_kernel::{
    AccountEntry, AccountId, Hash, IngestionRange, LedgerCloseMeta, LedgerEntry,
    LedgerEntryChange, LedgerSequence, Operation, OperationBody, Transaction, GENESIS, NULL_HASH,
};
use rand::Rng;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info, instrument, warn, Level};

const EVENT_TARGET: &str = "ledgerline::ingest::state";

/// One step of the ingestion state machine, carrying what it needs to resume.
#[derive(Debug)]
pub enum State {
    Start,
    /// Rebuild derived state from scratch; `stop` ends the run once done.
    BuildGenesis { stop: bool },
    /// Rebuild derived state from a history-archive checkpoint.
    Build { checkpoint: LedgerSequence },
    Resume { last_ingested: LedgerSequence },
    IngestLedger { sequence: LedgerSequence },
    CatchUp { range: IngestionRange },
    VerifyRange {
        from: LedgerSequence,
        to: LedgerSequence,
        verify_state: bool,
    },
    ReingestHistoryRange { range: IngestionRange, force: bool },
    StressTest {
        transactions: u32,
        changes_per_transaction: u32,
    },
    Shutdown { error: Option<IngestError> },
}

/// Drive the machine from `initial` until it shuts down, returning the error it shut down with.
///
/// # Panics
///
/// When a transaction is already open on the main store session at the start of a step: some
/// previous step left it behind, and nothing it wrote can be trusted.
#[expect(clippy::panic)]
pub(crate) async fn run(system: &System, initial: State) -> Result<(), IngestError> {
    let mut state = initial;
    loop {
        if system.store().current_transaction().is_some() {
            panic!("unexpected transaction");
        }

        if let State::Shutdown { error } = state {
            return match error {
                None => Ok(()),
                Some(error) => {
                    error!(target: EVENT_TARGET, reason = %error, "ingest.shutdown");
                    Err(error)
                }
            };
        }

        debug!(target: EVENT_TARGET, ?state, "state.enter");
        state = state.run(system).await;
    }
}

/// Route to shutdown; cancellation is a clean stop.
fn stop(error: impl Into<IngestError>) -> State {
    let error = error.into();
    if error.is_cancellation() {
        return State::Shutdown { error: None };
    }
    State::Shutdown { error: Some(error) }
}

macro_rules! attempt {
    ($e:expr) => {
        match $e {
            Ok(value) => value,
            Err(e) => return stop(e),
        }
    };
}

impl State {
    async fn run(self, system: &System) -> State {
        if system.cancellation().is_cancelled() {
            return State::Shutdown { error: None };
        }

        match self {
            State::Start => start(system).await,
            State::BuildGenesis { stop } => build_genesis(system, stop).await,
            State::Build { checkpoint } => build(system, checkpoint).await,
            State::Resume { last_ingested } => resume(system, last_ingested).await,
            State::IngestLedger { sequence } => ingest_ledger(system, sequence).await,
            State::CatchUp { range } => catch_up(system, range).await,
            State::VerifyRange {
                from,
                to,
                verify_state,
            } => verify_range(system, from, to, verify_state).await,
            State::ReingestHistoryRange { range, force } => {
                reingest_history_range(system, range, force).await
            }
            State::StressTest {
                transactions,
                changes_per_transaction,
            } => stress_test(system, transactions, changes_per_transaction).await,
            State::Shutdown { error } => State::Shutdown { error },
        }
    }
}

// Transactional discipline
// ----------------------------------------------------------------------------

/// Commit when `result` is a success, roll back otherwise. Either way, no transaction is left
/// open on `store` afterwards.
async fn finish<T>(
    store: &dyn HistoryStore,
    result: Result<T, IngestError>,
) -> Result<T, IngestError> {
    match result {
        Ok(value) => match store.commit().await {
            Ok(()) => Ok(value),
            Err(e) => {
                rollback(store).await;
                Err(e.into())
            }
        },
        Err(e) => {
            rollback(store).await;
            Err(e)
        }
    }
}

async fn rollback(store: &dyn HistoryStore) {
    if store.current_transaction().is_none() {
        return;
    }
    if let Err(e) = store.rollback().await {
        if !e.is_cancellation() {
            warn!(target: EVENT_TARGET, reason = %e, "transaction.rollback_failed");
        }
    }
}

async fn ensure_prepared(system: &System, range: LedgerRange) -> Result<(), IngestError> {
    let source = &system.config().ledger_source;
    if !source.is_prepared(range).await? {
        debug!(target: EVENT_TARGET, %range, "source.prepare");
        source.prepare_range(range, system.cancellation()).await?;
    }
    Ok(())
}

async fn fetch(system: &System, sequence: LedgerSequence) -> Result<LedgerCloseMeta, IngestError> {
    Ok(system
        .config()
        .ledger_source
        .fetch(sequence, system.cancellation())
        .await?)
}

// States
// ----------------------------------------------------------------------------

#[instrument(level = Level::DEBUG, target = EVENT_TARGET, name = "state.start", skip_all)]
async fn start(system: &System) -> State {
    let store = system.store();
    let version = attempt!(store.ingestion_format_version().await);
    let last_ingested = attempt!(store.last_ingested_sequence().await);

    if version == CURRENT_INGESTION_VERSION {
        return State::Resume { last_ingested };
    }

    info!(
        target: EVENT_TARGET,
        version,
        expected = CURRENT_INGESTION_VERSION,
        bootstrap = ?system.config().bootstrap,
        "store.stale"
    );

    match system.config().bootstrap {
        Bootstrap::Genesis => State::BuildGenesis { stop: false },
        Bootstrap::LatestCheckpoint => {
            let archive = &system.config().history_archive;
            let checkpoint = attempt!(archive.latest_checkpoint(system.cancellation()).await);
            State::Build { checkpoint }
        }
    }
}

#[instrument(level = Level::INFO, target = EVENT_TARGET, name = "state.build_genesis", skip_all)]
async fn build_genesis(system: &System, stop_after: bool) -> State {
    let store = system.store();
    attempt!(store.begin().await);

    let result = async {
        store.truncate_ingest_state_tables().await?;
        let stats = system.processor_runner().run_genesis(store).await?;
        store
            .set_ingestion_format_version(CURRENT_INGESTION_VERSION)
            .await?;
        store.set_last_ingested_sequence(GENESIS).await?;
        store.set_state_invalid(false).await?;
        Ok::<_, IngestError>(stats)
    }
    .await;

    let stats = attempt!(finish(store, result).await);
    info!(target: EVENT_TARGET, entries = stats.total(), "genesis.built");

    if stop_after {
        return State::Shutdown { error: None };
    }
    State::Resume {
        last_ingested: GENESIS,
    }
}

#[instrument(
    level = Level::INFO,
    target = EVENT_TARGET,
    name = "state.build",
    skip_all,
    fields(%checkpoint),
)]
async fn build(system: &System, checkpoint: LedgerSequence) -> State {
    let store = system.store();
    let range = attempt!(IngestionRange::single(checkpoint));
    attempt!(ensure_prepared(system, LedgerRange::Bounded(range)).await);
    let ledger = attempt!(fetch(system, checkpoint).await);

    attempt!(store.begin().await);
    let result = build_from_checkpoint(system, &ledger).await;
    attempt!(finish(store, result).await);

    info!(target: EVENT_TARGET, %checkpoint, "checkpoint.built");
    State::Resume {
        last_ingested: checkpoint,
    }
}

/// Load the archive state at `ledger` (a checkpoint) and its history rows. Runs inside the
/// caller's transaction.
async fn build_from_checkpoint(
    system: &System,
    ledger: &LedgerCloseMeta,
) -> Result<(), IngestError> {
    let store = system.store();
    let runner = system.processor_runner();
    store.truncate_ingest_state_tables().await?;
    runner
        .run_checkpoint(store, ledger.sequence, ledger.protocol_version, ledger.state_hash)
        .await?;
    if ledger.sequence > store.latest_history_ledger().await? {
        runner.run_transaction_processors(store, ledger).await?;
    }
    store
        .set_ingestion_format_version(CURRENT_INGESTION_VERSION)
        .await?;
    store.set_last_ingested_sequence(ledger.sequence).await?;
    store.set_state_invalid(false).await?;
    Ok(())
}

#[instrument(level = Level::DEBUG, target = EVENT_TARGET, name = "state.resume", skip_all)]
async fn resume(system: &System, expected: LedgerSequence) -> State {
    let store = system.store();

    attempt!(store.begin().await);
    let result = store.last_ingested_sequence().await.map_err(IngestError::from);
    rollback(store).await;
    let last_ingested = attempt!(result);

    if last_ingested != expected {
        debug!(target: EVENT_TARGET, %expected, %last_ingested, "cursor.moved");
    }

    let next = last_ingested + 1;
    let latest = attempt!(
        system
            .config()
            .ledger_source
            .latest_sequence(system.cancellation())
            .await
    );

    match system.config().mode {
        RunMode::Live if latest > next => {
            State::CatchUp {
                range: attempt!(IngestionRange::new(next, latest)),
            }
        }
        RunMode::Live => State::IngestLedger { sequence: next },
        RunMode::CatchUp if latest >= next => {
            State::CatchUp {
                range: attempt!(IngestionRange::new(next, latest)),
            }
        }
        RunMode::CatchUp => {
            info!(target: EVENT_TARGET, %last_ingested, "ingest.caught_up");
            State::Shutdown { error: None }
        }
    }
}

#[instrument(
    level = Level::DEBUG,
    target = EVENT_TARGET,
    name = "state.ingest_ledger",
    skip_all,
    fields(%sequence),
)]
async fn ingest_ledger(system: &System, sequence: LedgerSequence) -> State {
    attempt!(ensure_prepared(system, LedgerRange::Unbounded(sequence)).await);
    let ledger = attempt!(fetch(system, sequence).await);
    attempt!(ingest_one(system, &ledger, true).await);
    State::Resume {
        last_ingested: sequence,
    }
}

#[instrument(
    level = Level::INFO,
    target = EVENT_TARGET,
    name = "state.catch_up",
    skip_all,
    fields(%range),
)]
async fn catch_up(system: &System, range: IngestionRange) -> State {
    attempt!(ensure_prepared(system, LedgerRange::Bounded(range)).await);
    for sequence in range.iter() {
        if system.cancellation().is_cancelled() {
            return State::Shutdown { error: None };
        }
        let ledger = attempt!(fetch(system, sequence).await);
        attempt!(ingest_one(system, &ledger, true).await);
    }
    State::Resume {
        last_ingested: range.to(),
    }
}

/// Apply one ledger in its own transaction. Ledgers that are already ingested, or that do not
/// directly follow the cursor, are left alone.
async fn ingest_one(
    system: &System,
    ledger: &LedgerCloseMeta,
    verify_checkpoints: bool,
) -> Result<(), IngestError> {
    let store = system.store();
    let sequence = ledger.sequence;
    let started = Instant::now();

    store.begin().await?;
    let result = async {
        let last_ingested = store.last_ingested_sequence().await?;
        if last_ingested >= sequence {
            debug!(target: EVENT_TARGET, %sequence, %last_ingested, "ledger.already_ingested");
            return Ok(None);
        }
        if last_ingested + 1 != sequence {
            warn!(target: EVENT_TARGET, %sequence, %last_ingested, "ledger.gap");
            return Ok(None);
        }

        // A rebuilt store keeps its history: only derived state is replayed over it.
        let runner = system.processor_runner();
        let stats = if sequence <= store.latest_history_ledger().await? {
            debug!(target: EVENT_TARGET, %sequence, "ledger.history_present");
            runner.run_change_processors(store, ledger).await?
        } else {
            runner.run_all_processors(store, ledger).await?
        };
        store
            .rebuild_trade_aggregation_buckets(
                IngestionRange::single(sequence)?,
                system.config().trade_aggregation_slippage_filter,
            )
            .await?;
        store.set_last_ingested_sequence(sequence).await?;
        Ok::<_, IngestError>(Some(stats))
    }
    .await;

    if let Some(stats) = finish(store, result).await? {
        after_commit(system, ledger, &stats, started, verify_checkpoints).await;
    }
    Ok(())
}

async fn after_commit(
    system: &System,
    ledger: &LedgerCloseMeta,
    stats: &LedgerStats,
    started: Instant,
    verify_checkpoints: bool,
) {
    let sequence = ledger.sequence;
    let elapsed = started.elapsed();

    system.metrics.record_ledger(
        sequence.as_u32(),
        stats.transactions.transactions(),
        stats.transactions.operations,
        elapsed,
    );
    info!(
        target: EVENT_TARGET,
        %sequence,
        transactions = stats.transactions.transactions(),
        operations = stats.transactions.operations,
        changes = stats.changes.total(),
        elapsed_ms = elapsed.as_millis(),
        "ledger.ingested"
    );

    if let Some(cursor) = &system.config().cursor {
        if let Err(e) = cursor.reporter.set_cursor(&cursor.name, sequence).await {
            warn!(target: EVENT_TARGET, reason = %e, "cursor.update_failed");
        }
    }

    if !system.checkpoints().is_checkpoint(sequence.as_u32()) {
        return;
    }

    if verify_checkpoints {
        system.maybe_verify_state(sequence, false).await;
    }

    if system.config().reap_lookup_tables {
        maintenance(system, ledger.close_time).await;
    }
}

/// Reap unreferenced lookup rows and drop stale filtered transactions, each in its own
/// transaction. Failures are only logged.
async fn maintenance(system: &System, close_time: u64) {
    let store = system.store();
    let config = system.config();

    let reaped = async {
        store.begin().await?;
        let result = store
            .reap_lookup_tables(system.next_reap_offset(), config.reap_batch_size)
            .await
            .map_err(IngestError::from);
        finish(store, result).await
    }
    .await;

    match reaped {
        Ok(outcome) => {
            system.set_next_reap_offset(outcome.next_offset);
            debug!(
                target: EVENT_TARGET,
                deleted = outcome.deleted,
                next_offset = outcome.next_offset,
                "lookup_tables.reaped"
            );
        }
        Err(e) if e.is_cancellation() => return,
        Err(e) => warn!(target: EVENT_TARGET, reason = %e, "lookup_tables.reap_failed"),
    }

    let cutoff = close_time.saturating_sub(config.filtered_tmp_retention.as_secs());
    let deleted = async {
        store.begin().await?;
        let result = store
            .delete_filtered_tmp_older_than(cutoff)
            .await
            .map_err(IngestError::from);
        finish(store, result).await
    }
    .await;

    match deleted {
        Ok(deleted) => debug!(target: EVENT_TARGET, deleted, cutoff, "filtered_tmp.deleted"),
        Err(e) if e.is_cancellation() => {}
        Err(e) => warn!(target: EVENT_TARGET, reason = %e, "filtered_tmp.delete_failed"),
    }
}

#[instrument(
    level = Level::INFO,
    target = EVENT_TARGET,
    name = "state.verify_range",
    skip_all,
    fields(%from, %to, verify_state),
)]
async fn verify_range(
    system: &System,
    from: LedgerSequence,
    to: LedgerSequence,
    verify_state: bool,
) -> State {
    let range = attempt!(IngestionRange::new(from, to));
    let store = system.store();

    attempt!(store.begin().await);
    let last_ingested = store.last_ingested_sequence().await.map_err(IngestError::from);
    let emptiness = match last_ingested {
        Ok(last) if !last.is_zero() => Err(IngestError::DatabaseNotEmpty),
        Ok(_) => Ok(()),
        Err(e) => Err(e),
    };
    if let Err(e) = emptiness {
        rollback(store).await;
        return stop(e);
    }
    rollback(store).await;

    attempt!(ensure_prepared(system, LedgerRange::Bounded(range)).await);

    let first = attempt!(fetch(system, from).await);
    attempt!(store.begin().await);
    let result = build_from_checkpoint(system, &first).await;
    attempt!(finish(store, result).await);

    for sequence in range.iter().skip(1) {
        if system.cancellation().is_cancelled() {
            return State::Shutdown { error: None };
        }
        let ledger = attempt!(fetch(system, sequence).await);
        attempt!(ingest_one(system, &ledger, false).await);
    }

    if !verify_state {
        return State::Shutdown { error: None };
    }

    if !system.checkpoints().is_checkpoint(to.as_u32()) {
        return stop(VerifyError::NotACheckpoint(to));
    }

    let archive = &system.config().history_archive;
    match attempt!(verify::verify_state(store, &**archive, to, system.cancellation()).await) {
        Verdict::Match => {
            info!(target: EVENT_TARGET, %to, "range.verified");
            State::Shutdown { error: None }
        }
        Verdict::Mismatch { discrepancies } => stop(VerifyError::Mismatch {
            sequence: to,
            discrepancies,
        }),
        Verdict::Skipped => State::Shutdown { error: None },
    }
}

#[instrument(
    level = Level::INFO,
    target = EVENT_TARGET,
    name = "state.reingest",
    skip_all,
    fields(%range, force),
)]
async fn reingest_history_range(system: &System, range: IngestionRange, force: bool) -> State {
    let store = system.store();

    if !force {
        let last_ingested = attempt!(store.last_ingested_sequence().await);
        if !last_ingested.is_zero() && range.to() >= last_ingested {
            return stop(IngestError::ReingestRangeConflict {
                range,
                last_ingested,
            });
        }
    }

    attempt!(ensure_prepared(system, LedgerRange::Bounded(range)).await);

    for sequence in range.iter() {
        if system.cancellation().is_cancelled() {
            return State::Shutdown { error: None };
        }
        let ledger = attempt!(fetch(system, sequence).await);

        attempt!(store.begin().await);
        let result = async {
            let deleted = store
                .delete_range_all(IngestionRange::single(sequence)?)
                .await?;
            let stats = system
                .processor_runner()
                .run_transaction_processors(store, &ledger)
                .await?;
            Ok::<_, IngestError>((deleted, stats))
        }
        .await;
        let (deleted, stats) = attempt!(finish(store, result).await);

        debug!(
            target: EVENT_TARGET,
            %sequence,
            deleted,
            transactions = stats.transactions.transactions(),
            "ledger.reingested"
        );
    }

    attempt!(store.begin().await);
    let result = store
        .rebuild_trade_aggregation_buckets(range, system.config().trade_aggregation_slippage_filter)
        .await
        .map_err(IngestError::from);
    attempt!(finish(store, result).await);

    info!(target: EVENT_TARGET, %range, "range.reingested");
    State::Shutdown { error: None }
}

#[instrument(level = Level::INFO, target = EVENT_TARGET, name = "state.stress_test", skip_all)]
async fn stress_test(system: &System, transactions: u32, changes_per_transaction: u32) -> State {
    if transactions == 0 || changes_per_transaction == 0 {
        return stop(IngestError::InvalidStressTest);
    }

    let store = system.store();
    let last_ingested = attempt!(store.last_ingested_sequence().await);
    let ledger = synthetic_ledger(last_ingested + 1, transactions, changes_per_transaction);

    attempt!(store.begin().await);
    let started = Instant::now();
    let result = system
        .processor_runner()
        .run_all_processors(store, &ledger)
        .await;
    let elapsed = started.elapsed();

    // Nothing of a stress test is ever kept.
    rollback(store).await;
    let stats = attempt!(result);

    info!(
        target: EVENT_TARGET,
        transactions = stats.transactions.transactions(),
        operations = stats.transactions.operations,
        changes = stats.changes.total(),
        elapsed_ms = elapsed.as_millis(),
        "stress_test.done"
    );
    State::Shutdown { error: None }
}

/// A ledger of `transactions` transactions, each creating `changes_per_transaction` fresh
/// accounts.
fn synthetic_ledger(
    sequence: LedgerSequence,
    transactions: u32,
    changes_per_transaction: u32,
) -> LedgerCloseMeta {
    let mut rng = rand::rng();
    let source = AccountId::from(crate::processors::ROOT_ACCOUNT);
    let close_time = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default();

    let transactions = (0..transactions)
        .map(|_| {
            let accounts: Vec<AccountId> = (0..changes_per_transaction)
                .map(|_| AccountId::new(format!("GSTRESS{:049X}", rng.random::<u64>())))
                .collect();
            Transaction {
                hash: Hash::new(rng.random()),
                source: source.clone(),
                fee_charged: 100,
                successful: true,
                operations: accounts
                    .iter()
                    .map(|destination| Operation {
                        source: None,
                        body: OperationBody::CreateAccount {
                            destination: destination.clone(),
                            starting_balance: 1,
                        },
                        claims: vec![],
                    })
                    .collect(),
                changes: accounts
                    .into_iter()
                    .map(|account_id| {
                        LedgerEntryChange::Created(LedgerEntry::Account(AccountEntry {
                            account_id,
                            balance: 1,
                            sequence: 0,
                            num_subentries: 0,
                        }))
                    })
                    .collect(),
            }
        })
        .collect();

    LedgerCloseMeta {
        sequence,
        hash: NULL_HASH,
        previous_hash: NULL_HASH,
        protocol_version: 0,
        state_hash: NULL_HASH,
        close_time,
        transactions,
        upgrade_changes: vec![],
    }
}
