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

mod common;

use common::{account, ledger, state_after, Harness, CURSOR};
use ledgerline::{
    kernel::{LedgerKey, LedgerSequence, GENESIS},
    source::{LedgerSource, SourceError},
    store::{
        in_memory::Fault, IngestionCursor, RecordKind, Transactional, TxOptions,
    },
    Bootstrap, Config, IngestError, RunMode, StoreType, System, CURRENT_INGESTION_VERSION,
};
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing_json::TraceCapture;

#[tokio::test]
async fn catch_up_from_genesis() {
    let harness = Harness::new();
    harness.push_ledgers(2..=10);
    let system = harness.system();

    system.run().await.unwrap();

    let store = &harness.store;
    assert_eq!(
        store.last_ingested_sequence().await.unwrap(),
        LedgerSequence::new(10)
    );
    assert_eq!(
        store.ingestion_format_version().await.unwrap(),
        CURRENT_INGESTION_VERSION
    );
    assert!(store.committed_state().diff(&state_after(10)).is_empty());
    assert_eq!(store.rows(RecordKind::Transactions).len(), 9);
    assert_eq!(store.rows(RecordKind::FilteredTransactions).len(), 9);
    assert_eq!(store.rows(RecordKind::Operations).len(), 9);
    assert_eq!(harness.cursor.cursor(CURSOR), Some(LedgerSequence::new(10)));
    assert_eq!(system.metrics().ledgers_ingested, 9);
    assert_eq!(system.metrics().last_ingested, 10);
    assert!(store.current_transaction().is_none());
}

#[tokio::test]
async fn nothing_to_ingest_stops_after_genesis() {
    let harness = Harness::new();
    harness.system().run().await.unwrap();

    assert_eq!(
        harness.store.last_ingested_sequence().await.unwrap(),
        GENESIS
    );
    assert!(harness.store.committed_state().diff(&state_after(1)).is_empty());
}

#[tokio::test]
async fn resumes_where_it_stopped() {
    let harness = Harness::new();
    harness.push_ledgers(2..=5);
    harness.system().run().await.unwrap();

    harness.push_ledgers(6..=8);
    let before = harness.source.fetch_count();
    harness.system().run().await.unwrap();

    assert_eq!(harness.source.fetch_count() - before, 3);
    assert_eq!(
        harness.store.last_ingested_sequence().await.unwrap(),
        LedgerSequence::new(8)
    );
    assert_eq!(harness.store.rows(RecordKind::Transactions).len(), 7);
}

#[tokio::test]
async fn stale_store_is_rebuilt_from_the_latest_checkpoint() {
    let harness = Harness::new();
    harness.publish_checkpoint(63);
    harness.push_ledgers(63..=70);
    let system = System::new(Config {
        bootstrap: Bootstrap::LatestCheckpoint,
        disable_state_verification: true,
        ..harness.config()
    });

    system.run().await.unwrap();

    assert_eq!(
        harness.store.last_ingested_sequence().await.unwrap(),
        LedgerSequence::new(70)
    );
    assert!(harness.store.committed_state().diff(&state_after(70)).is_empty());
    // History starts at the checkpoint ledger.
    assert_eq!(harness.store.rows(RecordKind::Transactions).len(), 8);
}

#[tokio::test]
#[should_panic(expected = "unexpected transaction")]
async fn open_transaction_at_the_start_of_a_step_panics() {
    let harness = Harness::new();
    let system = harness.system();
    system.store().begin().await.unwrap();
    let _ = system.run().await;
}

#[tokio::test]
async fn cancelled_scope_stops_cleanly() {
    let harness = Harness::new();
    harness.push_ledgers(2..=4);
    let system = harness.system();
    system.cancellation().cancel();

    assert!(system.run().await.is_ok());
    assert_eq!(harness.store.counters().begins, 0);
    assert_eq!(harness.source.fetch_count(), 0);
}

#[tokio::test]
async fn store_cancellation_stops_cleanly() {
    let harness = Harness::new();
    harness.push_ledgers(2..=4);
    harness.store.inject(|faults| faults.begin = Some(Fault::Cancelled));
    let capture = TraceCapture::at_level(tracing::level_filters::LevelFilter::WARN);

    assert!(harness.system().run().await.is_ok());
    assert!(capture.events().is_empty());
}

#[tokio::test]
async fn failed_fetch_ends_the_run_with_an_error() {
    let harness = Harness::new();
    harness.push_ledgers(2..=6);
    harness.source.fail_on(LedgerSequence::new(4));
    let system = harness.system();

    let err = system.run().await.unwrap_err();

    assert!(matches!(err, IngestError::Source(SourceError::Backend(_))));
    assert_eq!(
        harness.store.last_ingested_sequence().await.unwrap(),
        LedgerSequence::new(3)
    );
    assert!(system.store().current_transaction().is_none());
}

#[tokio::test]
async fn failed_commit_is_rolled_back() {
    let harness = Harness::new();
    harness.push_ledgers(2..=3);
    let system = harness.system();
    system.build_genesis_state().await.unwrap();
    harness
        .store
        .inject(|faults| faults.commit = Some(Fault::Failure("disk full".to_string())));

    let err = system.run().await.unwrap_err();

    assert!(matches!(err, IngestError::Store(_)));
    assert_eq!(err.to_string(), "disk full");
    assert!(system.store().current_transaction().is_none());
    assert_eq!(
        harness.store.last_ingested_sequence().await.unwrap(),
        GENESIS
    );
    assert!(harness.store.rows(RecordKind::Transactions).is_empty());
}

#[tokio::test]
async fn failed_batch_insert_is_rolled_back() {
    let harness = Harness::new();
    harness.push_ledgers(2..=3);
    let system = harness.system();
    system.build_genesis_state().await.unwrap();
    harness
        .store
        .inject(|faults| faults.insert_rows = Some(Fault::Failure("constraint".to_string())));

    let err = system.run().await.unwrap_err();

    assert!(matches!(err, IngestError::Processor(_)));
    assert!(harness
        .store
        .committed_state()
        .get(&LedgerKey::Account(account(2)))
        .is_none());
    assert!(system.store().current_transaction().is_none());
}

#[tokio::test]
async fn cursor_failures_do_not_stop_ingestion() {
    let harness = Harness::new();
    harness.push_ledgers(2..=4);
    harness.cursor.refuse_updates(true);
    let capture = TraceCapture::at_level(tracing::level_filters::LevelFilter::WARN);

    harness.system().run().await.unwrap();

    assert_eq!(
        harness.store.last_ingested_sequence().await.unwrap(),
        LedgerSequence::new(4)
    );
    assert_eq!(harness.cursor.cursor(CURSOR), None);
    assert_eq!(
        capture.event_names(),
        vec!["cursor.update_failed"; 3]
    );
}

#[tokio::test]
async fn build_genesis_state_only_builds() {
    let harness = Harness::new();
    harness.push_ledgers(2..=4);
    let system = harness.system();

    system.build_genesis_state().await.unwrap();

    assert_eq!(
        harness.store.last_ingested_sequence().await.unwrap(),
        GENESIS
    );
    assert_eq!(harness.source.fetch_count(), 0);
}

#[tokio::test]
async fn stale_version_forces_a_rebuild() {
    let harness = Harness::new();
    harness.push_ledgers(2..=4);
    harness.system().run().await.unwrap();
    let history = |kind| harness.store.rows(kind).len();
    assert_eq!(history(RecordKind::Transactions), 3);
    assert_eq!(history(RecordKind::Effects), 6);

    harness
        .store
        .set_ingestion_format_version(CURRENT_INGESTION_VERSION - 1)
        .await
        .unwrap();
    harness.system().run().await.unwrap();

    // Genesis again, then the whole backlog, over the history already stored.
    assert!(harness.store.committed_state().diff(&state_after(4)).is_empty());
    assert_eq!(
        harness.store.ingestion_format_version().await.unwrap(),
        CURRENT_INGESTION_VERSION
    );
    assert_eq!(history(RecordKind::Transactions), 3);
    assert_eq!(history(RecordKind::Operations), 3);
    assert_eq!(history(RecordKind::Effects), 6);
    assert_eq!(history(RecordKind::FilteredTransactions), 3);

    harness.push_ledgers(5..=5);
    harness.system().run().await.unwrap();
    assert!(harness.store.committed_state().diff(&state_after(5)).is_empty());
    assert_eq!(history(RecordKind::Transactions), 4);
}

#[tokio::test]
async fn lookup_maintenance_runs_on_checkpoints() {
    let harness = Harness::new();
    harness.push_ledgers(2..=63);
    let system = System::new(Config {
        reap_lookup_tables: true,
        filtered_tmp_retention: Duration::from_secs(100),
        disable_state_verification: true,
        ..harness.config()
    });

    system.run().await.unwrap();

    // Ledger 63 closed 315s after the base time: filtered rows of ledgers closed more than
    // 100s earlier (2..=42) are gone.
    assert_eq!(harness.store.rows(RecordKind::FilteredTransactions).len(), 21);
    assert_eq!(harness.store.rows(RecordKind::Transactions).len(), 62);
}

#[tokio::test]
async fn live_mode_follows_the_source_until_shutdown() {
    let harness = Harness::new();
    harness.push_ledgers(2..=5);
    let system = Arc::new(System::new(Config {
        mode: RunMode::Live,
        ..harness.config()
    }));

    let running = system.clone();
    let handle = tokio::spawn(async move { running.run().await });

    harness.source.push(&ledger(6));
    let mut attempts = 0;
    while harness.store.last_ingested_sequence().await.unwrap() < LedgerSequence::new(6) {
        attempts += 1;
        assert!(attempts < 10_000, "ledger 6 never got ingested");
        tokio::task::yield_now().await;
    }

    system.shutdown().await;

    assert!(handle.await.unwrap().is_ok());
    assert!(harness.source.is_closed());
    assert_eq!(harness.cursor.cursor(CURSOR), Some(LedgerSequence::new(6)));
}

#[tokio::test]
async fn live_mode_waits_for_the_next_ledger() {
    let harness = Harness::new();
    let system = Arc::new(System::new(Config {
        mode: RunMode::Live,
        ..harness.config()
    }));

    let running = system.clone();
    let handle = tokio::spawn(async move { running.run().await });
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(
        harness.store.last_ingested_sequence().await.unwrap(),
        GENESIS
    );
    assert!(harness
        .source
        .is_prepared(ledgerline::source::LedgerRange::Unbounded(
            LedgerSequence::new(2)
        ))
        .await
        .unwrap());

    system.shutdown().await;
    assert!(handle.await.unwrap().is_ok());
    assert!(system.store().current_transaction().is_none());
}

#[tokio::test]
async fn shared_store_sessions_are_supported() {
    let harness = Harness::new();
    harness.push_ledgers(2..=3);
    let system = System::new(Config {
        store: StoreType::Shared(Arc::new(harness.store.clone())),
        ..harness.config()
    });

    system.run().await.unwrap();

    assert_eq!(
        harness.store.last_ingested_sequence().await.unwrap(),
        LedgerSequence::new(3)
    );
    assert_eq!(harness.store.counters().clones, 1);
}

#[tokio::test]
async fn verification_uses_repeatable_read_on_a_clone() {
    let harness = Harness::new();
    harness.push_ledgers(2..=63);
    harness.publish_checkpoint(63);
    let system = harness.system();

    system.run().await.unwrap();
    system.wait_for_verifications().await;

    let counters = harness.store.counters();
    assert_eq!(counters.clone_begins, 1);
    assert_eq!(counters.last_clone_tx, Some(TxOptions::repeatable_read()));
    assert_eq!(system.metrics().state_verifications, 1);
    assert_eq!(system.metrics().state_verification_failures, 0);
    assert!(!harness.store.state_invalid().await.unwrap());
}

#[tokio::test]
async fn cancellation_token_is_the_systems_scope() {
    let harness = Harness::new();
    let system = harness.system();
    let token: &CancellationToken = system.cancellation();
    assert!(!token.is_cancelled());
    system.shutdown().await;
    assert!(system.processor_runner().cancellation().is_cancelled());
}
