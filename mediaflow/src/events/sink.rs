//! Event sink trait and implementations.

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, Level};

/// Receiver for job lifecycle events.
///
/// The scheduler emits `job.leased`, `job.advanced`, `job.completed`,
/// `job.retry_scheduled` and `job.failed` with a JSON object describing
/// the job. Sinks must not fail the caller.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Emits an event asynchronously.
    async fn emit(&self, event_type: &str, data: Option<Value>);
}

/// A sink that discards all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn emit(&self, _event_type: &str, _data: Option<Value>) {}
}

/// A sink that writes events through `tracing`.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingEventSink {
    /// Creates a logging sink at the given level.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level logging sink.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }

    fn log_event(&self, event_type: &str, data: Option<&Value>) {
        let job_id = data.and_then(|d| d.get("job_id")).and_then(Value::as_str);
        if self.level == Level::DEBUG {
            debug!(event_type, job_id, event_data = ?data, "Event: {}", event_type);
        } else {
            info!(event_type, job_id, event_data = ?data, "Event: {}", event_type);
        }
    }
}

#[async_trait]
impl EventSink for LoggingEventSink {
    async fn emit(&self, event_type: &str, data: Option<Value>) {
        self.log_event(event_type, data.as_ref());
    }
}

/// A sink that keeps every event in memory, for tests.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: parking_lot::RwLock<Vec<(String, Option<Value>)>>,
}

impl CollectingEventSink {
    /// Creates an empty collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events.
    #[must_use]
    pub fn events(&self) -> Vec<(String, Option<Value>)> {
        self.events.read().clone()
    }

    /// Returns the collected event types in order.
    #[must_use]
    pub fn event_types(&self) -> Vec<String> {
        self.events.read().iter().map(|(t, _)| t.clone()).collect()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if no events have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Clears all collected events.
    pub fn clear(&self) {
        self.events.write().clear();
    }

    /// Returns the data of every event with exactly this type.
    #[must_use]
    pub fn events_of_type(&self, event_type: &str) -> Vec<Value> {
        self.events
            .read()
            .iter()
            .filter(|(t, _)| t == event_type)
            .map(|(_, data)| data.clone().unwrap_or(Value::Null))
            .collect()
    }
}

#[async_trait]
impl EventSink for CollectingEventSink {
    async fn emit(&self, event_type: &str, data: Option<Value>) {
        self.events.write().push((event_type.to_string(), data));
    }
}
