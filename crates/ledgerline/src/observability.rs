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

//! Installing the global `tracing` subscriber. Library code never calls this; embedding
//! binaries do, once, at start-up.

use std::env;
use thiserror::Error;
use tracing_subscriber::{
    filter::ParseError, layer::SubscriberExt, util::SubscriberInitExt, util::TryInitError,
    EnvFilter, Layer,
};

const LEDGERLINE_LOG_VAR: &str = "LEDGERLINE_LOG";

const DEFAULT_LEDGERLINE_LOG_FILTER: &str = "ledgerline=info";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Error, Debug)]
pub enum TracingSetupError {
    #[error("invalid {LEDGERLINE_LOG_VAR} filters: {0}")]
    InvalidFilter(#[from] ParseError),
    #[error("a global tracing subscriber is already installed: {0}")]
    AlreadyInstalled(#[from] TryInitError),
}

pub fn setup_tracing(format: LogFormat) -> Result<(), TracingSetupError> {
    let filter = default_filter(LEDGERLINE_LOG_VAR, DEFAULT_LEDGERLINE_LOG_FILTER)?;

    let layer = match format {
        LogFormat::Text => tracing_subscriber::fmt::layer().with_filter(filter).boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_filter(filter)
            .boxed(),
    };

    tracing_subscriber::registry().with(layer).try_init()?;
    Ok(())
}

/// Filter directives from `var`, or `default` when unset. Everything outside of the listed
/// targets is silenced, so dependencies don't pollute the output.
pub fn default_filter(var: &str, default: &str) -> Result<EnvFilter, ParseError> {
    EnvFilter::builder().parse(format!(
        "none,{}",
        env::var(var).ok().as_deref().unwrap_or(default)
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falls_back_to_default_directives() {
        let filter = default_filter("LEDGERLINE_LOG_UNSET_FOR_TESTS", "ledgerline=debug");
        assert!(filter.is_ok());
    }

    #[test]
    fn rejects_malformed_directives() {
        assert!(default_filter("LEDGERLINE_LOG_UNSET_FOR_TESTS", "ledgerline=loud").is_err());
    }
}
