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

//! Capture `tracing` output as JSON values, for asserting on what a piece of code logs.

use serde_json as json;
use std::sync::{Arc, RwLock};

mod capture;
pub use capture::{assert_trace, collect, TraceCapture};

mod layer;
pub use layer::JsonLayer;

/// Shared buffer of collected spans and events. Cloning yields a handle onto the same buffer.
#[repr(transparent)]
#[derive(Clone, Default)]
pub struct JsonTraceCollector(Arc<RwLock<Vec<json::Value>>>);

impl JsonTraceCollector {
    pub(crate) fn insert(&self, value: json::Value) {
        if let Ok(mut lines) = self.0.write() {
            lines.push(value);
        }
    }

    /// Everything collected so far, leaving the buffer untouched.
    pub fn snapshot(&self) -> Vec<json::Value> {
        match self.0.read() {
            Ok(lines) => lines.clone(),
            Err(err) => err.into_inner().clone(),
        }
    }

    /// Everything collected so far, emptying the buffer.
    pub fn flush(&self) -> Vec<json::Value> {
        match self.0.write() {
            Ok(mut lines) => std::mem::take(&mut *lines),
            // Poisoning only happens when a writer panicked mid-push; partial data is fine here.
            Err(err) => err.into_inner().clone(),
        }
    }
}

#[derive(Default)]
pub(crate) struct JsonVisitor {
    pub(crate) fields: json::Map<String, json::Value>,
}

impl JsonVisitor {
    /// Dotted field names (`a.b.c`) become nested objects.
    fn add_field(&mut self, path: &str, value: json::Value) {
        let steps: Vec<&str> = path.split('.').collect();
        insert_at(&mut self.fields, &steps, value);
    }
}

fn insert_at(object: &mut json::Map<String, json::Value>, steps: &[&str], value: json::Value) {
    match steps {
        [] => {}
        [last] => {
            object.insert((*last).to_string(), value);
        }
        [head, rest @ ..] => {
            let child = object
                .entry((*head).to_string())
                .or_insert_with(|| json::Value::Object(json::Map::new()));
            if !child.is_object() {
                *child = json::Value::Object(json::Map::new());
            }
            if let json::Value::Object(child) = child {
                insert_at(child, rest, value);
            }
        }
    }
}

macro_rules! record_as_json {
    ($method:ident, $ty:ty) => {
        fn $method(&mut self, field: &tracing::field::Field, value: $ty) {
            self.add_field(field.name(), json::json!(value));
        }
    };
}

impl tracing::field::Visit for JsonVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        self.add_field(field.name(), json::json!(format!("{value:?}")))
    }

    record_as_json!(record_f64, f64);
    record_as_json!(record_i64, i64);
    record_as_json!(record_u64, u64);
    record_as_json!(record_i128, i128);
    record_as_json!(record_u128, u128);
    record_as_json!(record_bool, bool);
    record_as_json!(record_str, &str);

    fn record_bytes(&mut self, field: &tracing::field::Field, value: &[u8]) {
        self.add_field(field.name(), json::json!(hex::encode(value)));
    }

    fn record_error(
        &mut self,
        field: &tracing::field::Field,
        value: &(dyn std::error::Error + 'static),
    ) {
        self.add_field(field.name(), json::json!(value.to_string()))
    }
}
