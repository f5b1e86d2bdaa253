//! Lifecycle event bus: trait for emitting audit/analytics events from the
//! flow engine and the hygiene sweep.
//!
//! Engines accept an `Arc<dyn EventSink>`; the job runner wires whatever
//! downstream pipeline is configured.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEventType {
    RunCreated,
    RunWaiting,
    RunCompleted,
    RunCancelled,
    RunFailed,
    MessageSent,
    MessageScheduled,
    ContactSuppressed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub event_id: Uuid,
    pub event_type: LifecycleEventType,
    /// Run, message or contact id the event is about.
    pub subject_id: Uuid,
    pub contact_id: Option<Uuid>,
    pub detail: Option<String>,
    pub timestamp: DateTime<Utc>,
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: LifecycleEvent);
}

/// No-op sink for tests and callers that don't need event emission.
pub struct NoOpSink;

impl EventSink for NoOpSink {
    fn emit(&self, _event: LifecycleEvent) {}
}

/// In-memory sink that captures events for testing.
#[derive(Default)]
pub struct CaptureSink {
    events: Mutex<Vec<LifecycleEvent>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.events.lock().expect("event bus mutex poisoned").clone()
    }

    pub fn count(&self) -> usize {
        self.events.lock().expect("event bus mutex poisoned").len()
    }

    pub fn count_type(&self, event_type: LifecycleEventType) -> usize {
        self.events
            .lock()
            .expect("event bus mutex poisoned")
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }
}

impl EventSink for CaptureSink {
    fn emit(&self, event: LifecycleEvent) {
        self.events.lock().expect("event bus mutex poisoned").push(event);
    }
}

/// Convenience builder for creating a `LifecycleEvent`.
pub fn make_event(
    event_type: LifecycleEventType,
    subject_id: Uuid,
    contact_id: Option<Uuid>,
    detail: Option<String>,
    timestamp: DateTime<Utc>,
) -> LifecycleEvent {
    LifecycleEvent {
        event_id: Uuid::new_v4(),
        event_type,
        subject_id,
        contact_id,
        detail,
        timestamp,
    }
}

pub fn noop_sink() -> Arc<dyn EventSink> {
    Arc::new(NoOpSink)
}

pub fn capture_sink() -> Arc<CaptureSink> {
    Arc::new(CaptureSink::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_sink() {
        let sink = capture_sink();
        let now = Utc::now();
        sink.emit(make_event(
            LifecycleEventType::RunCreated,
            Uuid::new_v4(),
            None,
            None,
            now,
        ));
        sink.emit(make_event(
            LifecycleEventType::MessageSent,
            Uuid::new_v4(),
            Some(Uuid::new_v4()),
            Some("welcome".into()),
            now,
        ));

        assert_eq!(sink.count(), 2);
        assert_eq!(sink.count_type(LifecycleEventType::MessageSent), 1);
        assert_eq!(sink.events()[1].detail.as_deref(), Some("welcome"));
    }

    #[test]
    fn test_noop_sink() {
        let sink = noop_sink();
        sink.emit(make_event(
            LifecycleEventType::RunFailed,
            Uuid::new_v4(),
            None,
            None,
            Utc::now(),
        ));
    }
}
