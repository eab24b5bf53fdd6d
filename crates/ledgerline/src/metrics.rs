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

use opentelemetry::metrics::{Gauge, Meter};
use serde::Serialize;
use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        OnceLock,
    },
    time::Duration,
};

/// Live counters, updated by the ingestion loop and by background verifications.
#[derive(Debug, Default)]
pub struct IngestionMetrics {
    ledgers_ingested: AtomicU64,
    last_ingested: AtomicU64,
    transactions: AtomicU64,
    operations: AtomicU64,
    last_ledger_micros: AtomicU64,
    state_verifications: AtomicU64,
    state_verification_failures: AtomicU64,
    last_verification_micros: AtomicU64,
    state_invalid: AtomicBool,
}

impl IngestionMetrics {
    pub(crate) fn record_ledger(
        &self,
        sequence: u32,
        transactions: u64,
        operations: u64,
        elapsed: Duration,
    ) {
        self.ledgers_ingested.fetch_add(1, Ordering::Relaxed);
        self.last_ingested.store(u64::from(sequence), Ordering::Relaxed);
        self.transactions.fetch_add(transactions, Ordering::Relaxed);
        self.operations.fetch_add(operations, Ordering::Relaxed);
        self.last_ledger_micros
            .store(duration_micros(elapsed), Ordering::Relaxed);
    }

    pub(crate) fn record_verification(&self, passed: bool, elapsed: Duration) {
        self.state_verifications.fetch_add(1, Ordering::Relaxed);
        if !passed {
            self.state_verification_failures
                .fetch_add(1, Ordering::Relaxed);
        }
        self.state_invalid.store(!passed, Ordering::Relaxed);
        self.last_verification_micros
            .store(duration_micros(elapsed), Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            ledgers_ingested: self.ledgers_ingested.load(Ordering::Relaxed),
            last_ingested: self.last_ingested.load(Ordering::Relaxed),
            transactions: self.transactions.load(Ordering::Relaxed),
            operations: self.operations.load(Ordering::Relaxed),
            last_ledger_micros: self.last_ledger_micros.load(Ordering::Relaxed),
            state_verifications: self.state_verifications.load(Ordering::Relaxed),
            state_verification_failures: self
                .state_verification_failures
                .load(Ordering::Relaxed),
            last_verification_micros: self.last_verification_micros.load(Ordering::Relaxed),
            state_invalid: self.state_invalid.load(Ordering::Relaxed),
        }
    }
}

fn duration_micros(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub ledgers_ingested: u64,
    pub last_ingested: u64,
    pub transactions: u64,
    pub operations: u64,
    pub last_ledger_micros: u64,
    pub state_verifications: u64,
    pub state_verification_failures: u64,
    pub last_verification_micros: u64,
    pub state_invalid: bool,
}

impl MetricsSnapshot {
    pub fn record_to_meter(&self, meter: &Meter) {
        static LEDGERS_INGESTED: OnceLock<Gauge<u64>> = OnceLock::new();
        static LAST_INGESTED: OnceLock<Gauge<u64>> = OnceLock::new();
        static TRANSACTIONS: OnceLock<Gauge<u64>> = OnceLock::new();
        static OPERATIONS: OnceLock<Gauge<u64>> = OnceLock::new();
        static LEDGER_DURATION: OnceLock<Gauge<u64>> = OnceLock::new();
        static VERIFICATIONS: OnceLock<Gauge<u64>> = OnceLock::new();
        static VERIFICATION_FAILURES: OnceLock<Gauge<u64>> = OnceLock::new();
        static VERIFICATION_DURATION: OnceLock<Gauge<u64>> = OnceLock::new();
        static STATE_INVALID: OnceLock<Gauge<u64>> = OnceLock::new();

        let gauge = |cell: &'static OnceLock<Gauge<u64>>, name: &'static str, help: &'static str| {
            cell.get_or_init(|| {
                meter
                    .u64_gauge(name)
                    .with_description(help)
                    .with_unit("int")
                    .build()
            })
        };

        gauge(
            &LEDGERS_INGESTED,
            "ingest_ledgers_ingested_total",
            "number of ledgers ingested since start",
        )
        .record(self.ledgers_ingested, &[]);
        gauge(
            &LAST_INGESTED,
            "ingest_ledger_last_ingested",
            "sequence of the last ingested ledger",
        )
        .record(self.last_ingested, &[]);
        gauge(
            &TRANSACTIONS,
            "ingest_transactions_total",
            "number of transactions ingested since start",
        )
        .record(self.transactions, &[]);
        gauge(
            &OPERATIONS,
            "ingest_operations_total",
            "number of operations ingested since start",
        )
        .record(self.operations, &[]);
        gauge(
            &LEDGER_DURATION,
            "ingest_ledger_duration_micros",
            "time spent ingesting the last ledger",
        )
        .record(self.last_ledger_micros, &[]);
        gauge(
            &VERIFICATIONS,
            "ingest_state_verifications_total",
            "number of completed state verifications",
        )
        .record(self.state_verifications, &[]);
        gauge(
            &VERIFICATION_FAILURES,
            "ingest_state_verification_failures_total",
            "number of state verifications that found discrepancies",
        )
        .record(self.state_verification_failures, &[]);
        gauge(
            &VERIFICATION_DURATION,
            "ingest_state_verification_duration_micros",
            "time spent on the last state verification",
        )
        .record(self.last_verification_micros, &[]);
        gauge(
            &STATE_INVALID,
            "ingest_state_invalid",
            "1 when the last state verification failed",
        )
        .record(u64::from(self.state_invalid), &[]);
    }
}
