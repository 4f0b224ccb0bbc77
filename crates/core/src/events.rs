use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state::RunId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventOutcome {
    Success,
    ShortCircuit,
    Failed,
}

/// One structured log line emitted by the engine or the logging middleware.
///
/// Free-text metadata values must be masked before they are placed in an
/// event; sinks treat the event as safe to persist or print as-is.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEvent {
    pub event_id: String,
    pub run_id: RunId,
    pub event_type: String,
    pub node: Option<String>,
    pub outcome: EventOutcome,
    pub metadata: BTreeMap<String, String>,
    pub occurred_at: DateTime<Utc>,
}

impl LogEvent {
    pub fn new(run_id: RunId, event_type: impl Into<String>, outcome: EventOutcome) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            run_id,
            event_type: event_type.into(),
            node: None,
            outcome,
            metadata: BTreeMap::new(),
            occurred_at: Utc::now(),
        }
    }

    pub fn with_node(mut self, node: impl Into<String>) -> Self {
        self.node = Some(node.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

pub trait LogSink: Send + Sync {
    fn emit(&self, event: LogEvent);
}

/// Captures events in memory; the sink used by tests to assert on what was
/// logged (including the masking property).
#[derive(Clone, Default)]
pub struct InMemoryLogSink {
    events: Arc<Mutex<Vec<LogEvent>>>,
}

impl InMemoryLogSink {
    pub fn events(&self) -> Vec<LogEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl LogSink for InMemoryLogSink {
    fn emit(&self, event: LogEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}

/// Forwards events to the `tracing` subscriber configured by the binary.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn emit(&self, event: LogEvent) {
        let metadata = serde_json::to_string(&event.metadata).unwrap_or_default();
        tracing::info!(
            event_type = %event.event_type,
            run_id = %event.run_id,
            node = event.node.as_deref().unwrap_or("-"),
            outcome = ?event.outcome,
            %metadata,
            "run event"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::{EventOutcome, InMemoryLogSink, LogEvent, LogSink};
    use crate::state::RunId;

    #[test]
    fn in_memory_sink_records_events_in_order() {
        let sink = InMemoryLogSink::default();
        let run_id = RunId::new_random();

        sink.emit(
            LogEvent::new(run_id, "node.completed", EventOutcome::Success)
                .with_node("classify_intent")
                .with_metadata("input", "***"),
        );
        sink.emit(LogEvent::new(run_id, "run.completed", EventOutcome::Success));

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, "node.completed");
        assert_eq!(events[0].node.as_deref(), Some("classify_intent"));
        assert_eq!(events[0].metadata.get("input").map(String::as_str), Some("***"));
        assert_eq!(events[1].event_type, "run.completed");
    }
}
