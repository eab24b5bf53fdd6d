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

use super::{LedgerRange, LedgerSource, SourceError};
use async_trait::async_trait;
use ledgerline_kernel::{from_cbor, to_cbor, Cancelled, LedgerCloseMeta, LedgerSequence};
use parking_lot::Mutex;
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// A ledger source fed by hand, holding ledgers as the raw bytes a real backend would stream.
#[derive(Default)]
pub struct MemoryLedgerSource {
    ledgers: Mutex<BTreeMap<LedgerSequence, Vec<u8>>>,
    prepared: Mutex<Vec<LedgerRange>>,
    failures: Mutex<BTreeSet<LedgerSequence>>,
    arrivals: Notify,
    closed: AtomicBool,
    fetches: AtomicUsize,
}

impl MemoryLedgerSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a ledger available, waking up any fetch waiting for it.
    pub fn push(&self, ledger: &LedgerCloseMeta) {
        self.push_raw(ledger.sequence, to_cbor(ledger));
    }

    pub fn push_raw(&self, sequence: LedgerSequence, bytes: Vec<u8>) {
        self.ledgers.lock().insert(sequence, bytes);
        self.arrivals.notify_waiters();
    }

    /// Make every future fetch of `sequence` fail.
    pub fn fail_on(&self, sequence: LedgerSequence) {
        self.failures.lock().insert(sequence);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_prepared(&self, sequence: LedgerSequence) -> Result<(), SourceError> {
        if self.prepared.lock().iter().any(|r| r.contains(sequence)) {
            return Ok(());
        }
        Err(SourceError::NotPrepared(LedgerRange::Unbounded(sequence)))
    }

    fn lookup(&self, sequence: LedgerSequence) -> Result<Option<LedgerCloseMeta>, SourceError> {
        if self.failures.lock().contains(&sequence) {
            return Err(SourceError::Backend(format!(
                "ledger {sequence} could not be read"
            )));
        }
        match self.ledgers.lock().get(&sequence) {
            None => Ok(None),
            Some(bytes) => from_cbor(bytes)
                .map(Some)
                .map_err(|source| SourceError::Decode { sequence, source }),
        }
    }
}

#[async_trait]
impl LedgerSource for MemoryLedgerSource {
    async fn latest_sequence(
        &self,
        cancel: &CancellationToken,
    ) -> Result<LedgerSequence, SourceError> {
        if cancel.is_cancelled() {
            return Err(Cancelled.into());
        }
        Ok(self
            .ledgers
            .lock()
            .keys()
            .next_back()
            .copied()
            .unwrap_or_default())
    }

    async fn fetch(
        &self,
        sequence: LedgerSequence,
        cancel: &CancellationToken,
    ) -> Result<LedgerCloseMeta, SourceError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.ensure_prepared(sequence)?;

        loop {
            if cancel.is_cancelled() {
                return Err(Cancelled.into());
            }
            if self.is_closed() {
                return Err(SourceError::Closed);
            }

            // Register interest before looking, so a push in between is not missed.
            let arrival = self.arrivals.notified();
            tokio::pin!(arrival);
            arrival.as_mut().enable();

            if let Some(ledger) = self.lookup(sequence)? {
                return Ok(ledger);
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(Cancelled.into()),
                _ = &mut arrival => {}
            }
        }
    }

    async fn prepare_range(
        &self,
        range: LedgerRange,
        cancel: &CancellationToken,
    ) -> Result<(), SourceError> {
        if cancel.is_cancelled() {
            return Err(Cancelled.into());
        }
        if self.is_closed() {
            return Err(SourceError::Closed);
        }
        self.prepared.lock().push(range);
        Ok(())
    }

    async fn is_prepared(&self, range: LedgerRange) -> Result<bool, SourceError> {
        Ok(self.prepared.lock().iter().any(|r| r.covers(&range)))
    }

    async fn close(&self) -> Result<(), SourceError> {
        self.closed.store(true, Ordering::SeqCst);
        self.prepared.lock().clear();
        self.arrivals.notify_waiters();
        Ok(())
    }
}
