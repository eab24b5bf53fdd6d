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

use crate::{JsonLayer, JsonTraceCollector};
use assert_json_diff::assert_json_eq;
use serde_json::Value;
use tracing::{dispatcher::DefaultGuard, level_filters::LevelFilter, Dispatch};
use tracing_subscriber::layer::SubscriberExt;

/// Collects everything traced on the current thread for as long as it is alive.
///
/// Unlike [`collect`], a capture can span `.await` points: within a current-thread runtime,
/// spawned tasks are polled on the capturing thread and are therefore captured too.
pub struct TraceCapture {
    collector: JsonTraceCollector,
    _guard: DefaultGuard,
}

impl TraceCapture {
    pub fn start() -> Self {
        Self::with_layer(|layer| layer)
    }

    /// Capture only events at `level` or more severe.
    pub fn at_level(level: LevelFilter) -> Self {
        Self::with_layer(|layer| layer.with_level(level))
    }

    pub fn with_layer(configure: impl FnOnce(JsonLayer) -> JsonLayer) -> Self {
        let collector = JsonTraceCollector::default();
        let layer = configure(JsonLayer::new(collector.clone()));
        let dispatch = Dispatch::new(tracing_subscriber::registry().with(layer));
        let guard = tracing::dispatcher::set_default(&dispatch);
        Self {
            collector,
            _guard: guard,
        }
    }

    /// Spans and events collected so far.
    pub fn traces(&self) -> Vec<Value> {
        self.collector.snapshot()
    }

    /// Events collected so far, spans excluded.
    pub fn events(&self) -> Vec<Value> {
        self.traces()
            .into_iter()
            .filter(|trace| trace.get("type").and_then(Value::as_str) == Some("event"))
            .collect()
    }

    /// Names of the events collected so far, in emission order.
    pub fn event_names(&self) -> Vec<String> {
        self.events()
            .iter()
            .filter_map(|event| event.get("name").and_then(Value::as_str))
            .map(str::to_string)
            .collect()
    }
}

/// Run `run` and return its result alongside everything it traced.
pub fn collect<F, R>(run: F) -> (R, Vec<Value>)
where
    F: FnOnce() -> R,
{
    let capture = TraceCapture::start();
    let result = run();
    (result, capture.collector.flush())
}

/// Run `run` and assert that its traces, stripped of their target, equal `expected`.
pub fn assert_trace<F, R>(run: F, expected: Vec<Value>) -> R
where
    F: FnOnce() -> R,
{
    let (result, collected) = collect(run);
    let collected: Vec<Value> = collected.into_iter().map(strip_target).collect();

    if collected != expected {
        eprintln!(
            "collected traces:\n  - {}",
            collected
                .iter()
                .map(Value::to_string)
                .collect::<Vec<_>>()
                .join("\n  - ")
        );
    }

    assert_json_eq!(Value::Array(collected), Value::Array(expected));
    result
}

fn strip_target(mut value: Value) -> Value {
    if let Value::Object(ref mut map) = value {
        map.remove("target");
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tracing::{debug, error, info, info_span, warn};

    #[test]
    fn records_spans_and_nested_fields() {
        let result = assert_trace(
            || {
                info_span!("ingest", sequence = 7).in_scope(|| {
                    info!(ledger.operations = 3, ledger.transactions = 1, "ledger.ingested");
                    "done"
                })
            },
            vec![
                json!({ "name": "ingest", "type": "span", "level": "INFO", "sequence": 7 }),
                json!({
                    "name": "ledger.ingested",
                    "type": "event",
                    "level": "INFO",
                    "ledger": { "operations": 3, "transactions": 1 },
                }),
            ],
        );
        assert_eq!(result, "done");
    }

    #[test]
    fn level_filter_drops_lower_severities() {
        let capture = TraceCapture::at_level(LevelFilter::WARN);
        debug!("quiet");
        info!("still quiet");
        warn!("loud");
        error!(reason = "boom", "louder");
        assert_eq!(capture.event_names(), vec!["loud", "louder"]);
        assert_eq!(capture.events()[1]["reason"], json!("boom"));
    }

    #[test]
    fn target_filter_keeps_matching_prefixes() {
        let capture = TraceCapture::with_layer(|layer| layer.with_targets(&["wanted"]));
        info!(target: "wanted::module", "kept");
        info!(target: "unwanted", "dropped");
        assert_eq!(capture.event_names(), vec!["kept"]);
    }

    #[test]
    fn capture_ends_with_guard() {
        let collector = {
            let capture = TraceCapture::start();
            info!("inside");
            capture.collector.clone()
        };
        info!("outside");
        assert_eq!(collector.snapshot().len(), 1);
    }
}
