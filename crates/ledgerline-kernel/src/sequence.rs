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

use crate::cbor;
use std::{fmt, ops::Add};

/// Position of a ledger in the source chain. Sequences are gap-free; `0` is never a real ledger
/// and stands for "nothing ingested yet" in cursors.
#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct LedgerSequence(u32);

/// The first ledger of any chain.
pub const GENESIS: LedgerSequence = LedgerSequence(1);

impl From<u32> for LedgerSequence {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<LedgerSequence> for u32 {
    fn from(value: LedgerSequence) -> Self {
        value.0
    }
}

impl Add<u32> for LedgerSequence {
    type Output = Self;

    fn add(self, rhs: u32) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl LedgerSequence {
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    pub const fn as_u32(self) -> u32 {
        self.0
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// The sequence right after this one, if any.
    pub fn next(self) -> Option<Self> {
        self.0.checked_add(1).map(Self)
    }

    /// The sequence right before this one, if any.
    pub fn previous(self) -> Option<Self> {
        self.0.checked_sub(1).map(Self)
    }
}

impl fmt::Display for LedgerSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<C> cbor::Encode<C> for LedgerSequence {
    fn encode<W: cbor::encode::Write>(
        &self,
        e: &mut cbor::Encoder<W>,
        ctx: &mut C,
    ) -> Result<(), cbor::encode::Error<W::Error>> {
        self.0.encode(e, ctx)
    }
}

impl<'b, C> cbor::Decode<'b, C> for LedgerSequence {
    fn decode(d: &mut cbor::Decoder<'b>, ctx: &mut C) -> Result<Self, cbor::decode::Error> {
        u32::decode(d, ctx).map(LedgerSequence)
    }
}

#[cfg(any(test, feature = "test-utils"))]
pub use tests::*;

#[cfg(any(test, feature = "test-utils"))]
mod tests {
    use super::*;
    use proptest::prop_compose;

    prop_compose! {
        pub fn any_ledger_sequence()(sequence in 1..1_000_000u32) -> LedgerSequence {
            LedgerSequence::from(sequence)
        }
    }

    #[test]
    fn next_and_previous_stop_at_bounds() {
        assert_eq!(LedgerSequence::new(u32::MAX).next(), None);
        assert_eq!(LedgerSequence::new(0).previous(), None);
        assert_eq!(GENESIS.next(), Some(LedgerSequence::new(2)));
        assert_eq!(GENESIS.previous(), Some(LedgerSequence::new(0)));
    }
}
