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

use serde::{Deserialize, Serialize};

type Sequence = u32;

/// Number of ledgers between two consecutive checkpoints on public networks.
pub const DEFAULT_CHECKPOINT_FREQUENCY: u32 = 64;

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum CheckpointError {
    #[error("checkpoint past the end of the sequence space")]
    PastHorizon,
    #[error("no checkpoint at or below sequence {0}")]
    BeforeFirstCheckpoint(Sequence),
}

/// Arithmetic over periodic checkpoint boundaries. A checkpoint closes every `frequency` ledgers,
/// on the *last* ledger of each period; so with a frequency of 64 the boundaries are 63, 127,
/// 191, ... and ledger 0 is never one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointManager {
    frequency: u32,
}

impl Default for CheckpointManager {
    fn default() -> Self {
        Self {
            frequency: DEFAULT_CHECKPOINT_FREQUENCY,
        }
    }
}

impl CheckpointManager {
    /// A frequency of 0 falls back to the default frequency.
    pub fn new(frequency: u32) -> Self {
        if frequency == 0 {
            return Self::default();
        }
        Self { frequency }
    }

    pub fn frequency(&self) -> u32 {
        self.frequency
    }

    pub fn is_checkpoint(&self, sequence: Sequence) -> bool {
        sequence % self.frequency == self.frequency - 1
    }

    /// The nearest checkpoint at or after the given sequence.
    pub fn checkpoint_containing(&self, sequence: Sequence) -> Result<Sequence, CheckpointError> {
        (sequence / self.frequency)
            .checked_mul(self.frequency)
            .and_then(|start| start.checked_add(self.frequency - 1))
            .ok_or(CheckpointError::PastHorizon)
    }

    /// The nearest checkpoint at or before the given sequence.
    pub fn previous_checkpoint(&self, sequence: Sequence) -> Result<Sequence, CheckpointError> {
        if self.is_checkpoint(sequence) {
            return Ok(sequence);
        }

        (sequence / self.frequency)
            .checked_mul(self.frequency)
            .and_then(|start| start.checked_sub(1))
            .ok_or(CheckpointError::BeforeFirstCheckpoint(sequence))
    }

    /// The first checkpoint strictly after the given sequence.
    pub fn next_checkpoint(&self, sequence: Sequence) -> Result<Sequence, CheckpointError> {
        sequence
            .checked_add(1)
            .ok_or(CheckpointError::PastHorizon)
            .and_then(|next| self.checkpoint_containing(next))
    }

    /// Bounds (inclusive) of the period closed by the checkpoint containing `sequence`. The
    /// first period starts at ledger 1, since there's no ledger 0.
    pub fn checkpoint_bounds(
        &self,
        sequence: Sequence,
    ) -> Result<(Sequence, Sequence), CheckpointError> {
        let end = self.checkpoint_containing(sequence)?;
        let start = (end - (self.frequency - 1)).max(1);
        Ok((start, end))
    }
}

#[cfg(any(test, feature = "test-utils"))]
pub use tests::*;

#[cfg(any(test, feature = "test-utils"))]
mod tests {
    use super::*;
    use proptest::prelude::*;

    prop_compose! {
        pub fn any_checkpoint_manager()(frequency in 1u32..4096u32) -> CheckpointManager {
            CheckpointManager::new(frequency)
        }
    }

    #[cfg(test)]
    mod properties {
        use super::*;
        use test_case::test_case;

        #[test_case(63 => true)]
        #[test_case(64 => false)]
        #[test_case(127 => true)]
        #[test_case(0 => false)]
        #[test_case(1 => false)]
        #[test_case(u32::MAX => true)]
        fn default_frequency_boundaries(sequence: u32) -> bool {
            CheckpointManager::default().is_checkpoint(sequence)
        }

        #[test]
        fn zero_frequency_falls_back_to_default() {
            assert_eq!(CheckpointManager::new(0).frequency(), DEFAULT_CHECKPOINT_FREQUENCY);
        }

        #[test_case(0 => Ok(63))]
        #[test_case(63 => Ok(63))]
        #[test_case(64 => Ok(127))]
        #[test_case(100 => Ok(127))]
        #[test_case(u32::MAX => Ok(u32::MAX))]
        fn checkpoint_containing_examples(sequence: u32) -> Result<u32, CheckpointError> {
            CheckpointManager::default().checkpoint_containing(sequence)
        }

        #[test_case(0 => Err(CheckpointError::BeforeFirstCheckpoint(0)))]
        #[test_case(62 => Err(CheckpointError::BeforeFirstCheckpoint(62)))]
        #[test_case(63 => Ok(63))]
        #[test_case(126 => Ok(63))]
        #[test_case(128 => Ok(127))]
        fn previous_checkpoint_examples(sequence: u32) -> Result<u32, CheckpointError> {
            CheckpointManager::default().previous_checkpoint(sequence)
        }

        #[test]
        fn next_checkpoint_is_strictly_after() {
            let manager = CheckpointManager::default();
            assert_eq!(manager.next_checkpoint(63), Ok(127));
            assert_eq!(manager.next_checkpoint(62), Ok(63));
            assert_eq!(
                manager.next_checkpoint(u32::MAX),
                Err(CheckpointError::PastHorizon)
            );
        }

        #[test]
        fn first_period_starts_at_one() {
            let manager = CheckpointManager::default();
            assert_eq!(manager.checkpoint_bounds(10), Ok((1, 63)));
            assert_eq!(manager.checkpoint_bounds(64), Ok((64, 127)));
        }

        proptest! {
            #[test]
            fn containing_checkpoint_is_a_checkpoint(
                manager in any_checkpoint_manager(),
                sequence in 0u32..1_000_000u32,
            ) {
                let checkpoint = manager.checkpoint_containing(sequence).unwrap();
                prop_assert!(manager.is_checkpoint(checkpoint));
                prop_assert!(checkpoint >= sequence);
                prop_assert!(checkpoint - sequence < manager.frequency());
            }

            #[test]
            fn previous_checkpoint_never_exceeds_sequence(
                manager in any_checkpoint_manager(),
                sequence in 0u32..1_000_000u32,
            ) {
                if let Ok(checkpoint) = manager.previous_checkpoint(sequence) {
                    prop_assert!(manager.is_checkpoint(checkpoint));
                    prop_assert!(checkpoint <= sequence);
                    prop_assert!(sequence - checkpoint < manager.frequency());
                } else {
                    prop_assert!(sequence < manager.frequency() - 1);
                }
            }
        }
    }
}
