//! Narrow view of a job handed to executors.

use crate::core::{Job, JobId, Payload, Stage};
use crate::errors::MediaflowError;
use parking_lot::Mutex;

/// What an executor may see of, and do to, the job it is running.
pub trait ExecutionContext: Send + Sync {
    /// Unit-of-work id.
    fn job_id(&self) -> JobId;

    /// Stage being executed.
    fn stage(&self) -> Stage;

    /// Policy-governed attempt number, starting at 1.
    fn attempt(&self) -> u32;

    /// Stages `payload` for the next stage.
    ///
    /// Nothing is enqueued until the executor returns success. Staging again
    /// replaces the earlier payload.
    ///
    /// # Errors
    ///
    /// Returns [`MediaflowError::InvalidTransition`] unless `stage` is the
    /// current stage's successor, or [`MediaflowError::StageMismatch`] if
    /// `payload` does not belong to `stage`.
    fn enqueue_next(&self, stage: Stage, payload: Payload) -> Result<(), MediaflowError>;
}

/// [`ExecutionContext`] built by the scheduler for one dispatch.
#[derive(Debug)]
pub struct JobContext {
    job_id: JobId,
    stage: Stage,
    attempt: u32,
    staged: Mutex<Option<Payload>>,
}

impl JobContext {
    /// Creates a context for `job`.
    #[must_use]
    pub fn new(job: &Job) -> Self {
        Self {
            job_id: job.job_id,
            stage: job.stage,
            attempt: job.attempt,
            staged: Mutex::new(None),
        }
    }

    /// Removes and returns the staged follow-up payload.
    pub fn take_staged(&self) -> Option<Payload> {
        self.staged.lock().take()
    }
}

impl ExecutionContext for JobContext {
    fn job_id(&self) -> JobId {
        self.job_id
    }

    fn stage(&self) -> Stage {
        self.stage
    }

    fn attempt(&self) -> u32 {
        self.attempt
    }

    fn enqueue_next(&self, stage: Stage, payload: Payload) -> Result<(), MediaflowError> {
        if self.stage.next() != Some(stage) {
            return Err(MediaflowError::InvalidTransition {
                from: self.stage,
                to: stage,
            });
        }
        if payload.stage() != stage {
            return Err(MediaflowError::StageMismatch {
                stage,
                payload_stage: payload.stage(),
            });
        }
        *self.staged.lock() = Some(payload);
        Ok(())
    }
}
