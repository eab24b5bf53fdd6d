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

use ledgerline_kernel::{LedgerEntryChange, Transaction};
use std::{collections::BTreeMap, time::Duration};

use super::transactions::operation_kind;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeStats {
    pub created: u64,
    pub updated: u64,
    pub removed: u64,
}

impl ChangeStats {
    pub fn record(&mut self, change: &LedgerEntryChange) {
        match change {
            LedgerEntryChange::Created(_) => self.created += 1,
            LedgerEntryChange::Updated(_) => self.updated += 1,
            LedgerEntryChange::Removed(_) => self.removed += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.created + self.updated + self.removed
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionStats {
    pub successful: u64,
    pub failed: u64,
    pub operations: u64,
    pub operations_by_kind: BTreeMap<&'static str, u64>,
}

impl TransactionStats {
    pub fn record(&mut self, transaction: &Transaction) {
        if transaction.successful {
            self.successful += 1;
        } else {
            self.failed += 1;
        }
        for operation in &transaction.operations {
            self.operations += 1;
            *self
                .operations_by_kind
                .entry(operation_kind(&operation.body))
                .or_default() += 1;
        }
    }

    pub fn transactions(&self) -> u64 {
        self.successful + self.failed
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TradeStats {
    pub trades: u64,
    /// Trades whose rounding slippage could not be computed.
    pub unknown_slippage: u64,
}

/// Everything a processor run reports about one ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerStats {
    pub changes: ChangeStats,
    pub transactions: TransactionStats,
    pub trades: TradeStats,
    /// Time spent in each processor group.
    pub durations: BTreeMap<&'static str, Duration>,
}
