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

use crate::AccountId;
use std::fmt;

#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
    minicbor::Encode,
    minicbor::Decode,
)]
pub enum Asset {
    #[n(0)]
    Native,
    #[n(1)]
    Credit {
        #[n(0)]
        code: String,
        #[n(1)]
        issuer: AccountId,
    },
}

impl Asset {
    pub fn credit(code: impl Into<String>, issuer: AccountId) -> Self {
        Asset::Credit {
            code: code.into(),
            issuer,
        }
    }

    pub fn is_native(&self) -> bool {
        matches!(self, Asset::Native)
    }
}

/// Canonical textual form, also used as the key of the assets lookup table.
impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Asset::Native => f.write_str("native"),
            Asset::Credit { code, issuer } => write!(f, "{code}:{issuer}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_form() {
        assert_eq!(Asset::Native.to_string(), "native");
        assert_eq!(
            Asset::credit("USD", AccountId::from("GISSUER")).to_string(),
            "USD:GISSUER"
        );
    }
}
