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

use crate::{LedgerEntry, LedgerEntryChange, LedgerKey, LedgerSequence};
use minicbor::{Decode, Encode};
use std::{collections::BTreeMap, fmt};

/// The full ledger state as of a given sequence, keyed for deterministic iteration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Encode, Decode)]
pub struct StateSnapshot {
    #[n(0)]
    pub sequence: LedgerSequence,
    #[n(1)]
    entries: BTreeMap<LedgerKey, LedgerEntry>,
}

impl StateSnapshot {
    pub fn new(sequence: LedgerSequence) -> Self {
        Self {
            sequence,
            entries: BTreeMap::new(),
        }
    }

    pub fn from_entries(
        sequence: LedgerSequence,
        entries: impl IntoIterator<Item = LedgerEntry>,
    ) -> Self {
        Self {
            sequence,
            entries: entries.into_iter().map(|e| (e.key(), e)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &LedgerKey) -> Option<&LedgerEntry> {
        self.entries.get(key)
    }

    pub fn entries(&self) -> impl Iterator<Item = &LedgerEntry> {
        self.entries.values()
    }

    pub fn insert(&mut self, entry: LedgerEntry) -> Option<LedgerEntry> {
        self.entries.insert(entry.key(), entry)
    }

    /// Apply a single change. Creations and updates are both upserts; removing an absent key is
    /// a no-op.
    pub fn apply(&mut self, change: &LedgerEntryChange) {
        match change {
            LedgerEntryChange::Created(entry) | LedgerEntryChange::Updated(entry) => {
                self.insert(entry.clone());
            }
            LedgerEntryChange::Removed(key) => {
                self.entries.remove(key);
            }
        }
    }

    /// Every key on which `self` (the derived state) and `expected` disagree, in key order.
    pub fn diff(&self, expected: &StateSnapshot) -> Vec<Discrepancy> {
        let mut discrepancies = Vec::new();

        for (key, want) in &expected.entries {
            match self.entries.get(key) {
                Some(got) if got == want => {}
                got => discrepancies.push(Discrepancy {
                    key: key.clone(),
                    expected: Some(want.clone()),
                    actual: got.cloned(),
                }),
            }
        }

        for (key, got) in &self.entries {
            if !expected.entries.contains_key(key) {
                discrepancies.push(Discrepancy {
                    key: key.clone(),
                    expected: None,
                    actual: Some(got.clone()),
                });
            }
        }

        discrepancies.sort_by(|a, b| a.key.cmp(&b.key));
        discrepancies
    }
}

/// One entry on which the derived state and the reference state disagree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discrepancy {
    pub key: LedgerKey,
    pub expected: Option<LedgerEntry>,
    pub actual: Option<LedgerEntry>,
}

impl fmt::Display for Discrepancy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.expected, &self.actual) {
            (Some(_), None) => write!(f, "missing entry {:?}", self.key),
            (None, Some(_)) => write!(f, "unexpected entry {:?}", self.key),
            (Some(expected), Some(actual)) => write!(
                f,
                "entry {:?} differs: expected {expected:?}, got {actual:?}",
                self.key
            ),
            (None, None) => write!(f, "entry {:?}", self.key),
        }
    }
}
