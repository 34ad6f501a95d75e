//! Error types for the mediaflow pipeline.
//!
//! Stage failures are *not* errors: executors report them as
//! [`Outcome`](crate::core::Outcome) values. The types here cover the
//! plumbing around them: the durable queue, configuration, and misuse of
//! the pipeline API.

use crate::core::{JobId, Stage};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// The main error type for mediaflow operations.
#[derive(Debug, Error)]
pub enum MediaflowError {
    /// A durable queue operation failed.
    #[error("{0}")]
    Queue(#[from] QueueError),

    /// The payload variant does not belong to the requested stage.
    #[error("Payload for stage '{payload_stage}' cannot be enqueued as '{stage}'")]
    StageMismatch {
        /// The stage the caller asked for.
        stage: Stage,
        /// The stage the payload belongs to.
        payload_stage: Stage,
    },

    /// A follow-up job was requested for a stage that does not follow the current one.
    #[error("Stage '{from}' cannot hand off to '{to}'")]
    InvalidTransition {
        /// The stage currently executing.
        from: Stage,
        /// The stage that was requested.
        to: Stage,
    },

    /// No executor is registered for a stage.
    #[error("No executor registered for stage '{0}'")]
    NoExecutor(Stage),

    /// Configuration is invalid.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// A submitted file could not be copied into the upload directory.
    #[error("Failed to store upload {path}: {source}")]
    Upload {
        /// The file being read or written.
        path: PathBuf,
        /// The underlying failure.
        #[source]
        source: std::io::Error,
    },

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MediaflowError {
    /// Creates a configuration error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Creates an upload error for `path`.
    #[must_use]
    pub fn upload(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Upload {
            path: path.into(),
            source,
        }
    }
}

/// Errors raised by [`DurableQueue`](crate::queue::DurableQueue) implementations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The caller's lease expired and the job was reclaimed (or already acknowledged).
    #[error("Lease lost for job {job_id} ({stage})")]
    LeaseLost {
        /// The job whose lease was lost.
        job_id: JobId,
        /// The stage of the leased record.
        stage: Stage,
    },

    /// A record for the same `(job_id, stage)` is already queued.
    #[error("Job {job_id} ({stage}) is already queued")]
    Duplicate {
        /// The duplicated job.
        job_id: JobId,
        /// The duplicated stage.
        stage: Stage,
    },

    /// A stored record could not be decoded.
    #[error("Corrupt queue record at {path}: {reason}")]
    Corrupt {
        /// Location of the record.
        path: PathBuf,
        /// Decoder message.
        reason: String,
    },

    /// Underlying storage failed.
    #[error("Queue storage error: {0}")]
    Io(#[from] std::io::Error),
}

impl QueueError {
    /// Creates a lease-lost error.
    #[must_use]
    pub fn lease_lost(job_id: JobId, stage: Stage) -> Self {
        Self::LeaseLost { job_id, stage }
    }

    /// Returns true if the error means another worker now owns the job.
    #[must_use]
    pub fn is_lease_lost(&self) -> bool {
        matches!(self, Self::LeaseLost { .. })
    }
}

/// Structured record of a job that will not be retried.
///
/// This is the pipeline's terminal output for failed work; it is logged and
/// handed to the event sink, and nothing further happens to the job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalFailure {
    /// The unit of work that failed.
    pub job_id: JobId,
    /// Stage that produced the failure.
    pub stage: Stage,
    /// Attempt number of the failing execution.
    pub attempt: u32,
    /// Classified reason (e.g. `server_unreachable`).
    pub reason: String,
}

impl TerminalFailure {
    /// Creates a new terminal failure record.
    #[must_use]
    pub fn new(job_id: JobId, stage: Stage, attempt: u32, reason: impl Into<String>) -> Self {
        Self {
            job_id,
            stage,
            attempt,
            reason: reason.into(),
        }
    }

    /// Converts to an event payload.
    #[must_use]
    pub fn to_event_data(&self) -> serde_json::Value {
        serde_json::json!({
            "job_id": self.job_id,
            "stage": self.stage,
            "attempt": self.attempt,
            "reason": self.reason,
        })
    }
}
