//! Analytics events emitted while assembling a pack.
//!
//! Recording is fire-and-forget: a sink never fails its caller.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// A layer of the pack was expected but its directory does not exist.
pub const OPTIONAL_SOURCE_MISSING: &str = "optional_source_missing";

pub type EventFields = BTreeMap<String, String>;

pub trait EventSink: Send + Sync {
    fn record_event(&self, name: &str, fields: EventFields);
}

/// Emits events as `tracing` records under the `kpack::analytics` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn record_event(&self, name: &str, fields: EventFields) {
        tracing::warn!(target: "kpack::analytics", event = name, ?fields, "analytics event");
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordedEvent {
    pub name: String,
    pub fields: EventFields,
    pub recorded_at: DateTime<Utc>,
}

impl RecordedEvent {
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }
}

/// Keeps events in memory for later inspection.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<RecordedEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn events_named(&self, name: &str) -> Vec<RecordedEvent> {
        self.events().into_iter().filter(|e| e.name == name).collect()
    }
}

impl EventSink for MemorySink {
    fn record_event(&self, name: &str, fields: EventFields) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(RecordedEvent {
                name: name.to_string(),
                fields,
                recorded_at: Utc::now(),
            });
    }
}

/// Forwards every event to each inner sink in order.
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn EventSink>>) -> Self {
        Self { sinks }
    }
}

impl EventSink for FanoutSink {
    fn record_event(&self, name: &str, fields: EventFields) {
        for sink in &self.sinks {
            sink.record_event(name, fields.clone());
        }
    }
}
