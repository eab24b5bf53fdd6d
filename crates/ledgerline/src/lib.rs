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

//! Ingestion core: keeps a history store in step with a ledger source, one transaction per
//! ledger, and checks its derived state against history-archive checkpoints.

pub use checkpoint_arithmetic::CheckpointManager;
pub use ledgerline_kernel as kernel;

pub mod archive;
pub mod config;
pub mod cursor;
pub mod ingest;
pub mod metrics;
pub mod observability;
pub mod processors;
pub mod source;
pub mod store;

pub use config::{Bootstrap, Config, CursorConfig, RunMode, StoreType};
pub use ingest::{
    IngestError, System, CURRENT_INGESTION_VERSION, STATE_VERIFIER_EXPECTED_INGESTION_VERSION,
};
