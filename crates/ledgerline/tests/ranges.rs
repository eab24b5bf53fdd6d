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

use common::{account, state_after, Harness};
use ledgerline::{
    ingest::VerifyError,
    kernel::{IngestionRange, LedgerKey, LedgerSequence, StateSnapshot, GENESIS},
    store::{IngestionCursor, RecordKind},
    IngestError,
};

fn seq(n: u32) -> LedgerSequence {
    LedgerSequence::new(n)
}

fn range(from: u32, to: u32) -> IngestionRange {
    IngestionRange::new(from, to).unwrap()
}

// Verify range
// ----------------------------------------------------------------------------

#[tokio::test]
async fn empty_range_is_refused_before_any_transaction() {
    let harness = Harness::new();
    let system = harness.system();

    let err = system.verify_range(seq(0), seq(0), true).await.unwrap_err();

    assert!(matches!(err, IngestError::InvalidRange(_)));
    assert_eq!(err.to_string(), "invalid range: [0, 0]");
    assert_eq!(harness.store.counters().begins, 0);
}

#[tokio::test]
async fn verify_range_requires_an_empty_store() {
    let harness = Harness::new();
    harness.push_ledgers(2..=3);
    let system = harness.system();
    system.run().await.unwrap();

    let err = system.verify_range(seq(63), seq(127), false).await.unwrap_err();

    assert!(matches!(err, IngestError::DatabaseNotEmpty));
    assert_eq!(err.to_string(), "database not empty");
    assert!(system.store().current_transaction().is_none());
}

#[tokio::test]
async fn verify_range_rebuilds_and_checks_the_state() {
    let harness = Harness::new();
    harness.publish_checkpoint(63);
    harness.publish_checkpoint(127);
    harness.push_ledgers(63..=127);
    let system = harness.system();

    system.verify_range(seq(63), seq(127), true).await.unwrap();

    assert_eq!(
        harness.store.last_ingested_sequence().await.unwrap(),
        seq(127)
    );
    assert!(!harness.store.state_invalid().await.unwrap());
    assert_eq!(harness.store.rows(RecordKind::Transactions).len(), 65);
    // Verification is synchronous here: nothing runs in the background.
    assert_eq!(harness.store.counters().clones, 0);
}

#[tokio::test]
async fn verify_range_mismatch_is_the_terminal_error() {
    let harness = Harness::new();
    harness.publish_checkpoint(63);
    let mut tampered = StateSnapshot::new(seq(127));
    for entry in state_after(127).entries() {
        if entry.key() != LedgerKey::Account(account(100)) {
            tampered.insert(entry.clone());
        }
    }
    harness.archive.publish(tampered).unwrap();
    harness.push_ledgers(63..=127);
    let system = harness.system();

    let err = system.verify_range(seq(63), seq(127), true).await.unwrap_err();

    assert!(matches!(
        err,
        IngestError::Verify(VerifyError::Mismatch { ref discrepancies, .. }) if discrepancies.len() == 1
    ));
    assert!(harness.store.state_invalid().await.unwrap());
}

#[tokio::test]
async fn verify_range_only_checks_checkpoints() {
    let harness = Harness::new();
    harness.publish_checkpoint(63);
    harness.push_ledgers(63..=70);
    let system = harness.system();

    let err = system.verify_range(seq(63), seq(70), true).await.unwrap_err();

    assert!(matches!(
        err,
        IngestError::Verify(VerifyError::NotACheckpoint(at)) if at == seq(70)
    ));
}

// Reingest
// ----------------------------------------------------------------------------

#[tokio::test]
async fn reingest_replaces_history_rows() {
    let harness = Harness::new();
    harness.push_ledgers(2..=10);
    let system = harness.system();
    system.run().await.unwrap();
    let transactions = harness.store.rows(RecordKind::Transactions);

    system
        .reingest_range(&[range(6, 7), range(2, 3)], false)
        .await
        .unwrap();

    let mut after = harness.store.rows(RecordKind::Transactions);
    let mut before = transactions;
    after.sort_by_key(|row| row.ledger());
    before.sort_by_key(|row| row.ledger());
    assert_eq!(after, before);
    assert_eq!(harness.store.rows(RecordKind::FilteredTransactions).len(), 9);
    assert_eq!(
        harness.store.last_ingested_sequence().await.unwrap(),
        seq(10)
    );
}

#[tokio::test]
async fn reingest_reaching_the_cursor_needs_force() {
    let harness = Harness::new();
    harness.push_ledgers(2..=10);
    let system = harness.system();
    system.run().await.unwrap();

    let err = system
        .reingest_range(&[range(5, 10)], false)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        IngestError::ReingestRangeConflict { last_ingested, .. } if last_ingested == seq(10)
    ));

    system.reingest_range(&[range(5, 10)], true).await.unwrap();
    assert_eq!(harness.store.rows(RecordKind::Transactions).len(), 9);
    assert_eq!(
        harness.store.last_ingested_sequence().await.unwrap(),
        seq(10)
    );
}

#[tokio::test]
async fn reingest_on_an_empty_store_is_allowed() {
    let harness = Harness::new();
    harness.push_ledgers(2..=4);
    let system = harness.system();

    system.reingest_range(&[range(2, 4)], false).await.unwrap();

    assert_eq!(harness.store.rows(RecordKind::Transactions).len(), 3);
    assert!(harness.store.committed_state().is_empty());
}

// Stress test
// ----------------------------------------------------------------------------

#[tokio::test]
async fn stress_test_parameters_must_be_positive() {
    let harness = Harness::new();
    let system = harness.system();

    let err = system.stress_test(0, 5).await.unwrap_err();
    assert!(matches!(err, IngestError::InvalidStressTest));
    assert_eq!(err.to_string(), "invalid stress test parameters");

    let err = system.stress_test(5, 0).await.unwrap_err();
    assert!(matches!(err, IngestError::InvalidStressTest));
    assert_eq!(harness.store.counters().begins, 0);
}

#[tokio::test]
async fn stress_test_leaves_no_trace() {
    let harness = Harness::new();
    let system = harness.system();
    system.build_genesis_state().await.unwrap();
    let rollbacks = harness.store.counters().rollbacks;

    system.stress_test(10, 3).await.unwrap();

    assert_eq!(harness.store.counters().rollbacks, rollbacks + 1);
    assert_eq!(
        harness.store.last_ingested_sequence().await.unwrap(),
        GENESIS
    );
    assert!(harness.store.committed_state().diff(&state_after(1)).is_empty());
    assert!(harness.store.rows(RecordKind::Operations).is_empty());
}
