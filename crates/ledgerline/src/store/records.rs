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

use super::{BatchInsert, StoreError};
use ledgerline_kernel::{AccountId, Asset, Hash, LedgerSequence};

pub const DEFAULT_MAX_BATCH_SIZE: usize = 5_000;

/// The history tables written by the processors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RecordKind {
    Transactions,
    /// Transactions kept aside for a limited time, outside of the queryable history.
    FilteredTransactions,
    Operations,
    Participants,
    Effects,
    Trades,
    /// Lookup table: one row per asset ever seen, shared by every ledger.
    Assets,
}

impl RecordKind {
    pub fn is_lookup(&self) -> bool {
        matches!(self, RecordKind::Assets)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EffectKind {
    AccountCreated,
    AccountCredited,
    AccountDebited,
    TrustlineChanged,
    Trade,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Row {
    Transaction {
        ledger: LedgerSequence,
        hash: Hash,
        source: AccountId,
        fee_charged: i64,
        operation_count: u32,
    },
    FilteredTransaction {
        ledger: LedgerSequence,
        hash: Hash,
        close_time: u64,
    },
    Operation {
        ledger: LedgerSequence,
        transaction: Hash,
        index: u32,
        kind: &'static str,
        source: AccountId,
    },
    Participant {
        ledger: LedgerSequence,
        transaction: Hash,
        account: AccountId,
    },
    Effect {
        ledger: LedgerSequence,
        account: AccountId,
        kind: EffectKind,
        asset: Asset,
        amount: i64,
    },
    Trade {
        ledger: LedgerSequence,
        seller: AccountId,
        buyer: AccountId,
        offer_id: i64,
        sold: Asset,
        amount_sold: i64,
        bought: Asset,
        amount_bought: i64,
        /// Distance, in basis points, between the execution rate and the offer price; unknown
        /// when the crossed offer was fully consumed.
        rounding_slippage_bps: Option<u32>,
    },
    Asset {
        asset: Asset,
    },
}

impl Row {
    pub fn kind(&self) -> RecordKind {
        match self {
            Row::Transaction { .. } => RecordKind::Transactions,
            Row::FilteredTransaction { .. } => RecordKind::FilteredTransactions,
            Row::Operation { .. } => RecordKind::Operations,
            Row::Participant { .. } => RecordKind::Participants,
            Row::Effect { .. } => RecordKind::Effects,
            Row::Trade { .. } => RecordKind::Trades,
            Row::Asset { .. } => RecordKind::Assets,
        }
    }

    /// The ledger a history row belongs to; lookup rows belong to none.
    pub fn ledger(&self) -> Option<LedgerSequence> {
        match self {
            Row::Transaction { ledger, .. }
            | Row::FilteredTransaction { ledger, .. }
            | Row::Operation { ledger, .. }
            | Row::Participant { ledger, .. }
            | Row::Effect { ledger, .. }
            | Row::Trade { ledger, .. } => Some(*ledger),
            Row::Asset { .. } => None,
        }
    }
}

/// Trade aggregation buckets are per ledger and per (ordered) asset pair.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BucketKey {
    pub ledger: LedgerSequence,
    pub base: Asset,
    pub counter: Asset,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TradeBucket {
    pub count: u64,
    pub base_volume: i64,
    pub counter_volume: i64,
}

// Batch insertion
// ----------------------------------------------------------------------------

/// Accumulates rows of one kind and flushes them to the store every `max_batch_size` rows.
pub struct BatchInsertBuilder<'a, S: ?Sized> {
    store: &'a S,
    kind: RecordKind,
    max_batch_size: usize,
    pending: Vec<Row>,
    written: usize,
}

impl<'a, S: BatchInsert + ?Sized> BatchInsertBuilder<'a, S> {
    /// A `max_batch_size` of 0 falls back to [`DEFAULT_MAX_BATCH_SIZE`].
    pub fn new(store: &'a S, kind: RecordKind, max_batch_size: usize) -> Self {
        let max_batch_size = if max_batch_size == 0 {
            DEFAULT_MAX_BATCH_SIZE
        } else {
            max_batch_size
        };
        Self {
            store,
            kind,
            max_batch_size,
            pending: Vec::new(),
            written: 0,
        }
    }

    pub async fn add(&mut self, row: Row) -> Result<(), StoreError> {
        if row.kind() != self.kind {
            return Err(StoreError::internal(format!(
                "{:?} row added to a {:?} batch",
                row.kind(),
                self.kind
            )));
        }
        self.pending.push(row);
        if self.pending.len() >= self.max_batch_size {
            self.flush().await?;
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), StoreError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let rows = std::mem::take(&mut self.pending);
        let len = rows.len();
        self.store.insert_rows(self.kind, rows).await?;
        self.written += len;
        Ok(())
    }

    /// Flush what remains and return the number of rows written by this builder.
    pub async fn exec(mut self) -> Result<usize, StoreError> {
        self.flush().await?;
        Ok(self.written)
    }
}
