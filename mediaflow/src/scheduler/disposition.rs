//! What happened to a job after one dispatch.

use crate::core::Stage;
use crate::errors::TerminalFailure;
use serde::Serialize;
use std::time::Duration;

/// The scheduler's decision for one leased job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// The stage succeeded and the next stage's job was enqueued.
    Advanced {
        /// Stage of the newly enqueued job.
        next_stage: Stage,
    },
    /// The final stage succeeded; the unit of work is done.
    Completed,
    /// The job was requeued for a later attempt.
    Retrying {
        /// Attempt number of the requeued record.
        attempt: u32,
        /// Delay before it becomes leasable.
        delay: Duration,
    },
    /// The job was removed with a terminal failure.
    Failed(TerminalFailure),
}

impl Disposition {
    /// Returns true if the job left the queue for good.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed(_))
    }

    /// Short label for logs.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Advanced { .. } => "advanced",
            Self::Completed => "completed",
            Self::Retrying { .. } => "retrying",
            Self::Failed(_) => "failed",
        }
    }
}

/// Running totals kept by the worker loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    /// Jobs handed to the next stage.
    pub advanced: u64,
    /// Units of work finished.
    pub completed: u64,
    /// Attempts requeued by the retry policy.
    pub retried: u64,
    /// Terminal failures.
    pub failed: u64,
    /// `run_once` calls that returned an error.
    pub errors: u64,
}

impl WorkerStats {
    /// Counts one disposition.
    pub fn record(&mut self, disposition: &Disposition) {
        match disposition {
            Disposition::Advanced { .. } => self.advanced += 1,
            Disposition::Completed => self.completed += 1,
            Disposition::Retrying { .. } => self.retried += 1,
            Disposition::Failed(_) => self.failed += 1,
        }
    }

    /// Total dispositions recorded.
    #[must_use]
    pub const fn processed(&self) -> u64 {
        self.advanced + self.completed + self.retried + self.failed
    }
}
