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

use crate::LedgerSequence;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid range: [{from}, {to}]")]
pub struct InvalidRange {
    pub from: LedgerSequence,
    pub to: LedgerSequence,
}

/// An inclusive, non-empty range of ledgers. The only way to obtain one is through
/// [`IngestionRange::new`], which rejects both reversed bounds and the `[0, 0]` range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct IngestionRange {
    from: LedgerSequence,
    to: LedgerSequence,
}

impl IngestionRange {
    pub fn new(
        from: impl Into<LedgerSequence>,
        to: impl Into<LedgerSequence>,
    ) -> Result<Self, InvalidRange> {
        let (from, to) = (from.into(), to.into());
        if (from.is_zero() && to.is_zero()) || from > to {
            return Err(InvalidRange { from, to });
        }
        Ok(Self { from, to })
    }

    /// A range covering exactly one ledger.
    pub fn single(sequence: LedgerSequence) -> Result<Self, InvalidRange> {
        Self::new(sequence, sequence)
    }

    pub fn from(&self) -> LedgerSequence {
        self.from
    }

    pub fn to(&self) -> LedgerSequence {
        self.to
    }

    pub fn len(&self) -> u64 {
        u64::from(self.to.as_u32()) - u64::from(self.from.as_u32()) + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn contains(&self, sequence: LedgerSequence) -> bool {
        self.from <= sequence && sequence <= self.to
    }

    /// All sequences of the range, in increasing order.
    pub fn iter(&self) -> impl Iterator<Item = LedgerSequence> {
        (self.from.as_u32()..=self.to.as_u32()).map(LedgerSequence::from)
    }
}

impl fmt::Display for IngestionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.from, self.to)
    }
}
