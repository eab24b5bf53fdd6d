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

use async_trait::async_trait;
use ledgerline_kernel::LedgerSequence;
use parking_lot::Mutex;
use std::{
    collections::BTreeMap,
    sync::atomic::{AtomicBool, Ordering},
};
use thiserror::Error;

#[derive(Error, Debug)]
#[error("unable to set cursor {id}: {reason}")]
pub struct CursorError {
    pub id: String,
    pub reason: String,
}

/// Tells the upstream node how far ingestion got, so it can release older ledgers. Advisory:
/// a failure never stops ingestion.
#[async_trait]
pub trait CursorReporter: Send + Sync {
    async fn set_cursor(&self, id: &str, value: LedgerSequence) -> Result<(), CursorError>;
}

/// Records cursors in memory; optionally refuses every update.
#[derive(Default)]
pub struct MemoryCursorReporter {
    cursors: Mutex<BTreeMap<String, LedgerSequence>>,
    refuse: AtomicBool,
}

impl MemoryCursorReporter {
    pub fn cursor(&self, id: &str) -> Option<LedgerSequence> {
        self.cursors.lock().get(id).copied()
    }

    pub fn refuse_updates(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }
}

#[async_trait]
impl CursorReporter for MemoryCursorReporter {
    async fn set_cursor(&self, id: &str, value: LedgerSequence) -> Result<(), CursorError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(CursorError {
                id: id.to_string(),
                reason: "connection refused".to_string(),
            });
        }
        self.cursors.lock().insert(id.to_string(), value);
        Ok(())
    }
}
