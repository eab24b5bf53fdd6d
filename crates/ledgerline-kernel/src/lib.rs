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

pub use minicbor as cbor;

pub mod account;
pub use account::AccountId;

pub mod asset;
pub use asset::Asset;

pub mod cancel;
pub use cancel::Cancelled;

pub mod entry;
pub use entry::{
    AccountEntry, LedgerEntry, LedgerEntryChange, LedgerKey, OfferEntry, Price, TrustlineEntry,
};

pub mod hash;
pub use hash::{Hash, NULL_HASH};

pub mod ledger;
pub use ledger::{ClaimAtom, LedgerCloseMeta, Operation, OperationBody, Transaction};

pub mod range;
pub use range::{IngestionRange, InvalidRange};

pub mod sequence;
pub use sequence::{LedgerSequence, GENESIS};

pub mod snapshot;
pub use snapshot::{Discrepancy, StateSnapshot};

/// Serialise any value to CBOR bytes. Encoding into a `Vec` cannot fail.
pub fn to_cbor<T: cbor::Encode<()>>(value: &T) -> Vec<u8> {
    match cbor::to_vec(value) {
        Ok(bytes) => bytes,
        Err(e) => unreachable!("encoding to a vector is infallible: {e}"),
    }
}

pub fn from_cbor<'b, T: cbor::Decode<'b, ()>>(bytes: &'b [u8]) -> Result<T, cbor::decode::Error> {
    cbor::decode(bytes)
}
