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

use crate::{AccountId, Asset};
use minicbor::{Decode, Encode};
use serde::{Deserialize, Serialize};

// Entries
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct AccountEntry {
    #[n(0)]
    pub account_id: AccountId,
    #[n(1)]
    pub balance: i64,
    #[n(2)]
    pub sequence: i64,
    #[n(3)]
    pub num_subentries: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct TrustlineEntry {
    #[n(0)]
    pub account_id: AccountId,
    #[n(1)]
    pub asset: Asset,
    #[n(2)]
    pub balance: i64,
    #[n(3)]
    pub limit: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct Price {
    #[n(0)]
    pub n: i32,
    #[n(1)]
    pub d: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct OfferEntry {
    #[n(0)]
    pub seller_id: AccountId,
    #[n(1)]
    pub offer_id: i64,
    #[n(2)]
    pub selling: Asset,
    #[n(3)]
    pub buying: Asset,
    #[n(4)]
    pub amount: i64,
    #[n(5)]
    pub price: Price,
    #[n(6)]
    pub flags: u32,
}

/// A piece of ledger state, as found both in the source stream and in reference snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub enum LedgerEntry {
    #[n(0)]
    Account(#[n(0)] AccountEntry),
    #[n(1)]
    Trustline(#[n(0)] TrustlineEntry),
    #[n(2)]
    Offer(#[n(0)] OfferEntry),
}

impl LedgerEntry {
    pub fn key(&self) -> LedgerKey {
        match self {
            LedgerEntry::Account(account) => LedgerKey::Account(account.account_id.clone()),
            LedgerEntry::Trustline(trustline) => {
                LedgerKey::Trustline(trustline.account_id.clone(), trustline.asset.clone())
            }
            LedgerEntry::Offer(offer) => LedgerKey::Offer(offer.offer_id),
        }
    }
}

/// Identifies a ledger entry independently of its content.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Encode, Decode,
)]
pub enum LedgerKey {
    #[n(0)]
    Account(#[n(0)] AccountId),
    #[n(1)]
    Trustline(#[n(0)] AccountId, #[n(1)] Asset),
    #[n(2)]
    Offer(#[n(0)] i64),
}

// Changes
// ----------------------------------------------------------------------------

/// A single state mutation caused by a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub enum LedgerEntryChange {
    #[n(0)]
    Created(#[n(0)] LedgerEntry),
    #[n(1)]
    Updated(#[n(0)] LedgerEntry),
    #[n(2)]
    Removed(#[n(0)] LedgerKey),
}

impl LedgerEntryChange {
    pub fn key(&self) -> LedgerKey {
        match self {
            LedgerEntryChange::Created(entry) | LedgerEntryChange::Updated(entry) => entry.key(),
            LedgerEntryChange::Removed(key) => key.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{from_cbor, to_cbor};

    #[test]
    fn offer_key_ignores_content() {
        let offer = OfferEntry {
            seller_id: AccountId::from("GSELLER"),
            offer_id: 4,
            selling: Asset::Native,
            buying: Asset::credit("EUR", AccountId::from("GISSUER")),
            amount: 500,
            price: Price { n: 1, d: 1 },
            flags: 1,
        };
        let mut other = offer.clone();
        other.amount = 1;
        assert_eq!(
            LedgerEntry::Offer(offer).key(),
            LedgerEntry::Offer(other).key()
        );
    }

    #[test]
    fn removed_change_decodes_back() {
        let change = LedgerEntryChange::Removed(LedgerKey::Trustline(
            AccountId::from("GHOLDER"),
            Asset::credit("USD", AccountId::from("GISSUER")),
        ));
        let decoded: LedgerEntryChange = from_cbor(&to_cbor(&change)).unwrap();
        assert_eq!(decoded, change);
    }
}
