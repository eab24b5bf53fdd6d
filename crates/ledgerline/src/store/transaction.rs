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

use super::{StoreError, TxOptions};
use parking_lot::Mutex;
use tracing::error;

const EVENT_TARGET: &str = "ledgerline::store::transaction";

/// Tracks the transaction open on a store handle, together with whatever state the backend
/// keeps for it. At most one transaction is open at a time; opening a second one or closing a
/// non-existent one is an error rather than a silent no-op.
pub struct OngoingTransaction<T> {
    slot: Mutex<Option<(TxOptions, T)>>,
}

impl<T> Default for OngoingTransaction<T> {
    fn default() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }
}

impl<T> OngoingTransaction<T> {
    pub fn current(&self) -> Option<TxOptions> {
        self.slot.lock().as_ref().map(|(options, _)| *options)
    }

    pub fn start(&self, options: TxOptions, state: T) -> Result<(), StoreError> {
        let mut slot = self.slot.lock();
        if slot.is_some() {
            return Err(StoreError::TransactionInProgress);
        }
        *slot = Some((options, state));
        Ok(())
    }

    /// Close the transaction, handing back its state.
    pub fn finish(&self) -> Result<(TxOptions, T), StoreError> {
        self.slot.lock().take().ok_or(StoreError::NoTransaction)
    }

    /// Run `f` against the state of the open transaction, or `None` when there is none. The
    /// handle stays locked while `f` runs.
    pub fn with_state<R>(&self, f: impl FnOnce(Option<&mut T>) -> R) -> R {
        f(self.slot.lock().as_mut().map(|(_, state)| state))
    }
}

impl<T> Drop for OngoingTransaction<T> {
    fn drop(&mut self) {
        if self.slot.get_mut().is_some() {
            error!(target: EVENT_TARGET, "transaction.left_open");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_transaction_at_a_time() {
        let ongoing = OngoingTransaction::<u8>::default();
        assert_eq!(ongoing.current(), None);

        ongoing.start(TxOptions::repeatable_read(), 1).unwrap();
        assert_eq!(ongoing.current(), Some(TxOptions::repeatable_read()));
        assert!(matches!(
            ongoing.start(TxOptions::default(), 2),
            Err(StoreError::TransactionInProgress)
        ));

        ongoing.with_state(|n| {
            if let Some(n) = n {
                *n += 1
            }
        });
        assert_eq!(ongoing.finish().unwrap().1, 2);
        assert!(matches!(ongoing.finish(), Err(StoreError::NoTransaction)));
        assert_eq!(ongoing.with_state(|n| n.copied()), None);
    }
}
