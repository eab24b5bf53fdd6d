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

use crate::{AccountId, Asset, Hash, LedgerEntryChange, LedgerSequence, Price};
use minicbor::{Decode, Encode};
use serde::{Deserialize, Serialize};

/// Everything the source reports about one closed ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct LedgerCloseMeta {
    #[n(0)]
    pub sequence: LedgerSequence,
    #[n(1)]
    pub hash: Hash,
    #[n(2)]
    pub previous_hash: Hash,
    #[n(3)]
    pub protocol_version: u32,
    /// Hash of the full ledger state after this ledger closed.
    #[n(4)]
    pub state_hash: Hash,
    /// Seconds since the unix epoch.
    #[n(5)]
    pub close_time: u64,
    #[n(6)]
    pub transactions: Vec<Transaction>,
    /// State changes caused by protocol upgrades and fee processing, outside of any transaction.
    #[n(7)]
    pub upgrade_changes: Vec<LedgerEntryChange>,
}

impl LedgerCloseMeta {
    pub fn operation_count(&self) -> usize {
        self.transactions.iter().map(|tx| tx.operations.len()).sum()
    }

    /// All state changes of the ledger, in application order.
    pub fn changes(&self) -> impl Iterator<Item = &LedgerEntryChange> {
        self.transactions
            .iter()
            .flat_map(|tx| tx.changes.iter())
            .chain(self.upgrade_changes.iter())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct Transaction {
    #[n(0)]
    pub hash: Hash,
    #[n(1)]
    pub source: AccountId,
    #[n(2)]
    pub fee_charged: i64,
    #[n(3)]
    pub successful: bool,
    #[n(4)]
    pub operations: Vec<Operation>,
    #[n(5)]
    pub changes: Vec<LedgerEntryChange>,
}

impl Transaction {
    /// Every account touched by the transaction, including operation sources and destinations.
    pub fn participants(&self) -> Vec<AccountId> {
        let mut participants = vec![self.source.clone()];
        for operation in &self.operations {
            participants.extend(operation.participants());
        }
        participants.sort();
        participants.dedup();
        participants
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct Operation {
    #[n(0)]
    pub source: Option<AccountId>,
    #[n(1)]
    pub body: OperationBody,
    /// Offers crossed while executing the operation.
    #[n(2)]
    pub claims: Vec<ClaimAtom>,
}

impl Operation {
    pub fn participants(&self) -> Vec<AccountId> {
        let mut participants: Vec<AccountId> = self.source.iter().cloned().collect();
        match &self.body {
            OperationBody::CreateAccount { destination, .. }
            | OperationBody::Payment { destination, .. } => {
                participants.push(destination.clone());
            }
            OperationBody::ManageSellOffer { .. } | OperationBody::ChangeTrust { .. } => {}
        }
        participants.extend(self.claims.iter().map(|claim| claim.seller_id.clone()));
        participants
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub enum OperationBody {
    #[n(0)]
    CreateAccount {
        #[n(0)]
        destination: AccountId,
        #[n(1)]
        starting_balance: i64,
    },
    #[n(1)]
    Payment {
        #[n(0)]
        destination: AccountId,
        #[n(1)]
        asset: Asset,
        #[n(2)]
        amount: i64,
    },
    #[n(2)]
    ManageSellOffer {
        #[n(0)]
        selling: Asset,
        #[n(1)]
        buying: Asset,
        #[n(2)]
        amount: i64,
        #[n(3)]
        price: Price,
        #[n(4)]
        offer_id: i64,
    },
    #[n(3)]
    ChangeTrust {
        #[n(0)]
        asset: Asset,
        #[n(1)]
        limit: i64,
    },
}

/// One side of a trade: an offer (partially) consumed by an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct ClaimAtom {
    #[n(0)]
    pub seller_id: AccountId,
    #[n(1)]
    pub offer_id: i64,
    #[n(2)]
    pub asset_sold: Asset,
    #[n(3)]
    pub amount_sold: i64,
    #[n(4)]
    pub asset_bought: Asset,
    #[n(5)]
    pub amount_bought: i64,
}
