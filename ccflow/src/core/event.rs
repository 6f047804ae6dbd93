//! Build event type for lifecycle notifications.

use super::{Stage, StageResult};
use crate::events::EventSink;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// An event emitted while a build runs.
///
/// Events are consumed by event sinks for logging, monitoring, or tests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildEvent {
    /// The event type (e.g., "unit.stage.started", "link.failed").
    #[serde(rename = "type")]
    pub event_type: String,

    /// When the event occurred (RFC 3339).
    pub timestamp: String,

    /// The event payload data.
    #[serde(default)]
    pub data: HashMap<String, serde_json::Value>,
}

impl BuildEvent {
    /// Creates a new build event.
    #[must_use]
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            data: HashMap::new(),
        }
    }

    /// Adds a data field to the event.
    #[must_use]
    pub fn add_data(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Returns the payload as a JSON object.
    #[must_use]
    pub fn payload(&self) -> serde_json::Value {
        let mut map: serde_json::Map<String, serde_json::Value> =
            self.data.clone().into_iter().collect();
        map.insert("timestamp".to_string(), serde_json::json!(self.timestamp));
        serde_json::Value::Object(map)
    }

    /// Sends the event to a sink without blocking.
    pub fn emit_to(&self, sink: &dyn EventSink) {
        sink.try_emit(&self.event_type, Some(self.payload()));
    }

    /// Creates a "build.started" event.
    #[must_use]
    pub fn build_started(build_id: &str, units: usize, target: &str) -> Self {
        Self::new("build.started")
            .add_data("build_id", serde_json::json!(build_id))
            .add_data("units", serde_json::json!(units))
            .add_data("target", serde_json::json!(target))
    }

    /// Creates a "build.completed" event.
    #[must_use]
    pub fn build_completed(build_id: &str, status: &str, duration_ms: f64) -> Self {
        Self::new("build.completed")
            .add_data("build_id", serde_json::json!(build_id))
            .add_data("status", serde_json::json!(status))
            .add_data("duration_ms", serde_json::json!(duration_ms))
    }

    /// Creates a "unit.stage.started" event.
    #[must_use]
    pub fn stage_started(unit: &str, stage: Stage) -> Self {
        Self::new("unit.stage.started")
            .add_data("unit", serde_json::json!(unit))
            .add_data("stage", serde_json::json!(stage.as_str()))
    }

    /// Creates a "unit.stage.completed" or "unit.stage.failed" event from a
    /// finished stage.
    #[must_use]
    pub fn stage_finished(result: &StageResult) -> Self {
        let event = if result.is_success() {
            Self::new("unit.stage.completed").add_data("artifact", serde_json::json!(result.artifact))
        } else {
            Self::new("unit.stage.failed")
                .add_data("status", serde_json::json!(result.status.to_string()))
                .add_data("exit_code", serde_json::json!(result.exit_code))
        };

        event
            .add_data("unit", serde_json::json!(result.subject))
            .add_data("stage", serde_json::json!(result.stage.as_str()))
            .add_data("duration_ms", serde_json::json!(result.duration_ms()))
    }

    /// Creates a "link.started" event.
    #[must_use]
    pub fn link_started(output: &str, inputs: usize) -> Self {
        Self::new("link.started")
            .add_data("output", serde_json::json!(output))
            .add_data("inputs", serde_json::json!(inputs))
    }

    /// Creates a "link.completed" or "link.failed" event.
    #[must_use]
    pub fn link_finished(result: &StageResult) -> Self {
        let event_type = if result.is_success() {
            "link.completed"
        } else {
            "link.failed"
        };

        Self::new(event_type)
            .add_data("output", serde_json::json!(result.subject))
            .add_data("exit_code", serde_json::json!(result.exit_code))
            .add_data("duration_ms", serde_json::json!(result.duration_ms()))
    }

    /// Creates a "link.skipped" event.
    #[must_use]
    pub fn link_skipped(reason: &str) -> Self {
        Self::new("link.skipped").add_data("reason", serde_json::json!(reason))
    }
}
