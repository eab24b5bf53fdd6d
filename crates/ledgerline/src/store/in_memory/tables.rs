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

use crate::store::{BucketKey, RecordKind, Row, TradeBucket};
use ledgerline_kernel::{
    Asset, IngestionRange, LedgerEntry, LedgerEntryChange, LedgerSequence, StateSnapshot,
};
use std::collections::{BTreeMap, BTreeSet};

/// Everything a [`super::MemoryStore`] holds.
#[derive(Debug, Clone, Default)]
pub(crate) struct Tables {
    pub(crate) last_ingested: LedgerSequence,
    pub(crate) version: u32,
    pub(crate) state_invalid: bool,
    pub(crate) state: StateSnapshot,
    pub(crate) history: BTreeMap<RecordKind, Vec<Row>>,
    /// Asset lookup rows, in insertion order.
    pub(crate) assets: Vec<Asset>,
    pub(crate) buckets: BTreeMap<BucketKey, TradeBucket>,
}

/// A write, recorded so that it can be replayed onto the committed tables.
#[derive(Debug, Clone)]
pub(crate) enum Mutation {
    SetLastIngested(LedgerSequence),
    SetVersion(u32),
    SetStateInvalid(bool),
    ApplyChanges(Vec<LedgerEntryChange>),
    TruncateState,
    InsertRows(RecordKind, Vec<Row>),
    DeleteAssets(BTreeSet<Asset>),
    ReplaceBuckets(IngestionRange, BTreeMap<BucketKey, TradeBucket>),
    DeleteFilteredBefore(u64),
    DeleteRange(IngestionRange),
}

impl Tables {
    /// Apply a mutation, returning the number of rows it affected.
    pub(crate) fn apply(&mut self, mutation: &Mutation) -> u64 {
        match mutation {
            Mutation::SetLastIngested(sequence) => {
                self.last_ingested = *sequence;
                1
            }
            Mutation::SetVersion(version) => {
                self.version = *version;
                1
            }
            Mutation::SetStateInvalid(invalid) => {
                self.state_invalid = *invalid;
                1
            }
            Mutation::ApplyChanges(changes) => {
                changes.iter().for_each(|change| self.state.apply(change));
                changes.len() as u64
            }
            Mutation::TruncateState => {
                let removed = self.state.len() as u64;
                self.state = StateSnapshot::default();
                removed
            }
            Mutation::InsertRows(RecordKind::Assets, rows) => {
                let mut inserted = 0;
                for row in rows {
                    if let Row::Asset { asset } = row {
                        if !self.assets.contains(asset) {
                            self.assets.push(asset.clone());
                            inserted += 1;
                        }
                    }
                }
                inserted
            }
            Mutation::InsertRows(kind, rows) => {
                self.history.entry(*kind).or_default().extend(rows.iter().cloned());
                rows.len() as u64
            }
            Mutation::DeleteAssets(assets) => {
                let before = self.assets.len();
                self.assets.retain(|asset| !assets.contains(asset));
                (before - self.assets.len()) as u64
            }
            Mutation::ReplaceBuckets(range, buckets) => {
                self.buckets.retain(|key, _| !range.contains(key.ledger));
                self.buckets
                    .extend(buckets.iter().map(|(key, bucket)| (key.clone(), *bucket)));
                buckets.len() as u64
            }
            Mutation::DeleteFilteredBefore(cutoff) => {
                let rows = self
                    .history
                    .entry(RecordKind::FilteredTransactions)
                    .or_default();
                let before = rows.len();
                rows.retain(|row| {
                    !matches!(row, Row::FilteredTransaction { close_time, .. } if close_time < cutoff)
                });
                (before - rows.len()) as u64
            }
            Mutation::DeleteRange(range) => {
                let mut deleted = 0;
                for rows in self.history.values_mut() {
                    let before = rows.len();
                    rows.retain(|row| !row.ledger().is_some_and(|l| range.contains(l)));
                    deleted += before - rows.len();
                }
                self.buckets.retain(|key, _| !range.contains(key.ledger));
                deleted as u64
            }
        }
    }

    pub(crate) fn latest_history_ledger(&self) -> LedgerSequence {
        self.history
            .values()
            .flatten()
            .filter_map(Row::ledger)
            .max()
            .unwrap_or_default()
    }

    /// Assets still referenced by the derived state or by a history row.
    pub(crate) fn referenced_assets(&self) -> BTreeSet<&Asset> {
        let mut referenced = BTreeSet::new();
        for entry in self.state.entries() {
            match entry {
                LedgerEntry::Account(_) => {}
                LedgerEntry::Trustline(trustline) => {
                    referenced.insert(&trustline.asset);
                }
                LedgerEntry::Offer(offer) => {
                    referenced.insert(&offer.selling);
                    referenced.insert(&offer.buying);
                }
            }
        }
        for row in self.history.values().flatten() {
            match row {
                Row::Effect { asset, .. } => {
                    referenced.insert(asset);
                }
                Row::Trade { sold, bought, .. } => {
                    referenced.insert(sold);
                    referenced.insert(bought);
                }
                Row::Transaction { .. }
                | Row::FilteredTransaction { .. }
                | Row::Operation { .. }
                | Row::Participant { .. }
                | Row::Asset { .. } => {}
            }
        }
        referenced
    }

    /// Aggregate the trades of `range`, skipping those whose known slippage exceeds the filter.
    pub(crate) fn aggregate_trades(
        &self,
        range: IngestionRange,
        slippage_filter: u32,
    ) -> BTreeMap<BucketKey, TradeBucket> {
        let mut buckets: BTreeMap<BucketKey, TradeBucket> = BTreeMap::new();
        let trades = self.history.get(&RecordKind::Trades).into_iter().flatten();

        for row in trades {
            let Row::Trade {
                ledger,
                sold,
                amount_sold,
                bought,
                amount_bought,
                rounding_slippage_bps,
                ..
            } = row
            else {
                continue;
            };

            if !range.contains(*ledger) {
                continue;
            }

            if slippage_filter > 0 && rounding_slippage_bps.is_some_and(|s| s > slippage_filter) {
                continue;
            }

            let (base, base_amount, counter, counter_amount) = if sold <= bought {
                (sold, amount_sold, bought, amount_bought)
            } else {
                (bought, amount_bought, sold, amount_sold)
            };

            let bucket = buckets
                .entry(BucketKey {
                    ledger: *ledger,
                    base: base.clone(),
                    counter: counter.clone(),
                })
                .or_default();
            bucket.count += 1;
            bucket.base_volume = bucket.base_volume.saturating_add(*base_amount);
            bucket.counter_volume = bucket.counter_volume.saturating_add(*counter_amount);
        }

        buckets
    }
}
