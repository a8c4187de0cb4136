//! Human-readable events attached to workloads.

use std::fmt;

use orrery_core::{ObjectKey, Resource, Workload};
use parking_lot::Mutex;
use tracing::{info, warn};

/// Severity of a recorded event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    /// Expected lifecycle step.
    Normal,
    /// Something the workload's owner should look at.
    Warning,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => write!(f, "Normal"),
            Self::Warning => write!(f, "Warning"),
        }
    }
}

/// An event as recorded against a workload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    /// Workload the event is about.
    pub workload: ObjectKey,
    /// Severity.
    pub event_type: EventType,
    /// Machine-readable reason, e.g. `SelectingAll`.
    pub reason: String,
    /// Human-readable message.
    pub message: String,
}

/// Sink for workload events.
pub trait EventRecorder: Send + Sync {
    /// Record an event against `workload`.
    fn record(&self, workload: &Workload, event_type: EventType, reason: &str, message: &str);
}

/// Writes events to the tracing subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingRecorder;

impl EventRecorder for TracingRecorder {
    fn record(&self, workload: &Workload, event_type: EventType, reason: &str, message: &str) {
        let key = workload.key();
        match event_type {
            EventType::Normal => info!(workload = %key, reason, "{message}"),
            EventType::Warning => warn!(workload = %key, reason, "{message}"),
        }
    }
}

/// Keeps events in memory.
#[derive(Debug, Default)]
pub struct MemoryRecorder {
    events: Mutex<Vec<RecordedEvent>>,
}

impl MemoryRecorder {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every event recorded so far.
    #[must_use]
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().clone()
    }

    /// Reasons of the events recorded so far, in order.
    #[must_use]
    pub fn reasons(&self) -> Vec<String> {
        self.events.lock().iter().map(|e| e.reason.clone()).collect()
    }
}

impl EventRecorder for MemoryRecorder {
    fn record(&self, workload: &Workload, event_type: EventType, reason: &str, message: &str) {
        self.events.lock().push(RecordedEvent {
            workload: workload.key(),
            event_type,
            reason: reason.to_owned(),
            message: message.to_owned(),
        });
    }
}
