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

#![allow(dead_code)]

use ledgerline::{
    archive::MemoryArchive,
    cursor::MemoryCursorReporter,
    kernel::{
        AccountEntry, AccountId, Asset, Hash, LedgerCloseMeta, LedgerEntry, LedgerEntryChange,
        LedgerSequence, Operation, OperationBody, StateSnapshot, Transaction, NULL_HASH,
    },
    processors::{GENESIS_BALANCE, ROOT_ACCOUNT},
    source::MemoryLedgerSource,
    store::in_memory::MemoryStore,
    Config, CursorConfig, RunMode, StoreType, System,
};
use std::{ops::RangeInclusive, sync::Arc};

pub const CURSOR: &str = "ingest";

pub const BASE_CLOSE_TIME: u64 = 1_700_000_000;

/// Collaborators of a system under test, kept at hand for inspection.
pub struct Harness {
    pub store: MemoryStore,
    pub source: Arc<MemoryLedgerSource>,
    pub archive: Arc<MemoryArchive>,
    pub cursor: Arc<MemoryCursorReporter>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            store: MemoryStore::new(),
            source: Arc::new(MemoryLedgerSource::new()),
            archive: Arc::new(MemoryArchive::default()),
            cursor: Arc::new(MemoryCursorReporter::default()),
        }
    }

    /// A catch-up configuration wired to the harness collaborators.
    pub fn config(&self) -> Config {
        Config {
            store: StoreType::InMem(self.store.clone()),
            ledger_source: self.source.clone(),
            history_archive: self.archive.clone(),
            mode: RunMode::CatchUp,
            cursor: Some(CursorConfig {
                name: CURSOR.to_string(),
                reporter: self.cursor.clone(),
            }),
            ..Config::default()
        }
    }

    pub fn system(&self) -> System {
        System::new(self.config())
    }

    pub fn push_ledgers(&self, sequences: RangeInclusive<u32>) {
        for sequence in sequences {
            self.source.push(&ledger(sequence));
        }
    }

    /// Publish the state the fixture ledgers lead to at `checkpoint`.
    pub fn publish_checkpoint(&self, checkpoint: u32) {
        self.archive
            .publish(state_after(checkpoint))
            .expect("not a checkpoint");
    }
}

pub fn account(sequence: u32) -> AccountId {
    AccountId::new(format!("GACCOUNT{sequence:048}"))
}

fn account_entry(account_id: AccountId, balance: i64) -> LedgerEntry {
    LedgerEntry::Account(AccountEntry {
        account_id,
        balance,
        sequence: 0,
        num_subentries: 0,
    })
}

pub fn root_entry() -> LedgerEntry {
    account_entry(AccountId::from(ROOT_ACCOUNT), GENESIS_BALANCE)
}

/// Ledger `sequence` funds a new account, and carries one failed payment.
pub fn ledger(sequence: u32) -> LedgerCloseMeta {
    let funded = Transaction {
        hash: Hash::new([1; 32]),
        source: AccountId::from(ROOT_ACCOUNT),
        fee_charged: 100,
        successful: true,
        operations: vec![Operation {
            source: None,
            body: OperationBody::CreateAccount {
                destination: account(sequence),
                starting_balance: 100,
            },
            claims: vec![],
        }],
        changes: vec![LedgerEntryChange::Created(account_entry(
            account(sequence),
            100,
        ))],
    };

    let failed = Transaction {
        hash: Hash::new([2; 32]),
        source: AccountId::from("GBROKE"),
        fee_charged: 100,
        successful: false,
        operations: vec![Operation {
            source: None,
            body: OperationBody::Payment {
                destination: AccountId::from(ROOT_ACCOUNT),
                asset: Asset::Native,
                amount: 1,
            },
            claims: vec![],
        }],
        changes: vec![],
    };

    LedgerCloseMeta {
        sequence: LedgerSequence::new(sequence),
        hash: NULL_HASH,
        previous_hash: NULL_HASH,
        protocol_version: 21,
        state_hash: NULL_HASH,
        close_time: BASE_CLOSE_TIME + u64::from(sequence) * 5,
        transactions: vec![funded, failed],
        upgrade_changes: vec![],
    }
}

/// Derived state once the genesis and fixture ledgers `2..=sequence` are applied.
pub fn state_after(sequence: u32) -> StateSnapshot {
    let mut state = StateSnapshot::new(LedgerSequence::new(sequence));
    state.insert(root_entry());
    for funded in 2..=sequence {
        state.insert(account_entry(account(funded), 100));
    }
    state
}
