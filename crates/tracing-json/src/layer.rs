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

use crate::{JsonTraceCollector, JsonVisitor};
use serde_json as json;
use serde_json::Value;
use tracing::level_filters::LevelFilter;

/// A [`tracing_subscriber::Layer`] recording spans (on enter) and events into a
/// [`JsonTraceCollector`]. Only targets starting with one of `targets` are kept, when set.
pub struct JsonLayer {
    collector: JsonTraceCollector,
    targets: Option<Vec<String>>,
    level: LevelFilter,
}

impl JsonLayer {
    pub fn new(collector: JsonTraceCollector) -> Self {
        Self {
            collector,
            targets: None,
            level: LevelFilter::TRACE,
        }
    }

    pub fn with_targets(mut self, targets: &[&str]) -> Self {
        self.targets = Some(targets.iter().map(|t| (*t).to_string()).collect());
        self
    }

    pub fn with_level(mut self, level: LevelFilter) -> Self {
        self.level = level;
        self
    }

    fn accepts(&self, metadata: &tracing::Metadata<'_>) -> bool {
        if *metadata.level() > self.level {
            return false;
        }
        match &self.targets {
            None => true,
            Some(targets) => targets.iter().any(|t| metadata.target().starts_with(t)),
        }
    }
}

impl<S> tracing_subscriber::Layer<S> for JsonLayer
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fn on_new_span(
        &self,
        attrs: &tracing::span::Attributes<'_>,
        id: &tracing::span::Id,
        ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        if let Some(span) = ctx.span(id) {
            if !self.accepts(span.metadata()) {
                return;
            }
            let mut visitor = JsonVisitor::default();
            attrs.record(&mut visitor);
            span.extensions_mut().insert(visitor.fields);
        }
    }

    fn on_enter(&self, id: &tracing::span::Id, ctx: tracing_subscriber::layer::Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };
        if !self.accepts(span.metadata()) {
            return;
        }

        let mut span_json = json::json!({
            "name": span.name(),
            "type": "span",
            "target": span.metadata().target(),
            "level": span.metadata().level().to_string(),
        });

        if let Some(fields) = span.extensions().get::<json::Map<String, Value>>() {
            for (key, value) in fields {
                span_json[key] = value.clone();
            }
        }

        self.collector.insert(span_json);
    }

    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        if !self.accepts(event.metadata()) {
            return;
        }

        let mut visitor = JsonVisitor::default();
        event.record(&mut visitor);

        let name = visitor
            .fields
            .remove("message")
            .and_then(|value| value.as_str().map(str::to_string))
            .unwrap_or_default();

        let mut event_json = json::json!({
            "name": name,
            "type": "event",
            "target": event.metadata().target(),
            "level": event.metadata().level().to_string(),
        });

        for (key, value) in visitor.fields {
            event_json[key] = value;
        }

        self.collector.insert(event_json);
    }
}
