//! Event sinks for job lifecycle observability.
//!
//! Sinks are injected into the scheduler; there is no process-wide sink.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

/// Event emitted when a job record is leased.
pub const JOB_LEASED: &str = "job.leased";
/// Event emitted when a TRANSFORM job hands off to SHIP.
pub const JOB_ADVANCED: &str = "job.advanced";
/// Event emitted when the last stage succeeds.
pub const JOB_COMPLETED: &str = "job.completed";
/// Event emitted when a failed attempt is requeued with a delay.
pub const JOB_RETRY_SCHEDULED: &str = "job.retry_scheduled";
/// Event emitted for every terminal failure.
pub const JOB_FAILED: &str = "job.failed";
