//! Scripted executors for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;

use crate::core::{JobId, Outcome, Payload, Stage};
use crate::executors::{ExecutionContext, StageExecutor};

/// One recorded call to a [`ScriptedExecutor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorCall {
    /// Job the call was for.
    pub job_id: JobId,
    /// Attempt reported by the context.
    pub attempt: u32,
    /// Payload passed in.
    pub payload: Payload,
}

/// An executor that replays queued outcomes, then a default one.
#[derive(Debug)]
pub struct ScriptedExecutor {
    stage: Stage,
    script: Mutex<VecDeque<Outcome>>,
    default: Outcome,
    staged_next: Option<Payload>,
    calls: Mutex<Vec<ExecutorCall>>,
}

impl ScriptedExecutor {
    /// Creates an executor that always succeeds without a follow-up payload.
    #[must_use]
    pub fn new(stage: Stage) -> Self {
        Self {
            stage,
            script: Mutex::new(VecDeque::new()),
            default: Outcome::success(),
            staged_next: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Sets the outcome returned once the script is exhausted.
    #[must_use]
    pub fn with_default(mut self, outcome: Outcome) -> Self {
        self.default = outcome;
        self
    }

    /// Appends an outcome to the script.
    #[must_use]
    pub fn then(mut self, outcome: Outcome) -> Self {
        self.script.get_mut().push_back(outcome);
        self
    }

    /// Stages `payload` through [`ExecutionContext::enqueue_next`] on every call.
    #[must_use]
    pub fn staging(mut self, payload: Payload) -> Self {
        self.staged_next = Some(payload);
        self
    }

    /// Returns every recorded call.
    #[must_use]
    pub fn calls(&self) -> Vec<ExecutorCall> {
        self.calls.lock().clone()
    }

    /// Returns the number of calls.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl StageExecutor for ScriptedExecutor {
    fn stage(&self) -> Stage {
        self.stage
    }

    async fn execute(&self, ctx: &dyn ExecutionContext, payload: &Payload) -> Outcome {
        self.calls.lock().push(ExecutorCall {
            job_id: ctx.job_id(),
            attempt: ctx.attempt(),
            payload: payload.clone(),
        });

        if let (Some(next), Some(stage)) = (&self.staged_next, self.stage.next()) {
            if let Err(e) = ctx.enqueue_next(stage, next.clone()) {
                return Outcome::permanent(format!("staging_failed: {e}"));
            }
        }

        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.default.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Job;
    use crate::executors::JobContext;
    use chrono::Utc;

    #[tokio::test]
    async fn test_scripted_executor_replays_then_defaults() {
        let executor = ScriptedExecutor::new(Stage::Ship)
            .then(Outcome::transient("server_unreachable"))
            .with_default(Outcome::success());
        let job = Job::new(Stage::Ship, Payload::ship("out.jpg"), Utc::now()).unwrap();
        let ctx = JobContext::new(&job);

        assert_eq!(
            executor.execute(&ctx, &job.payload).await,
            Outcome::transient("server_unreachable")
        );
        assert_eq!(executor.execute(&ctx, &job.payload).await, Outcome::success());
        assert_eq!(executor.call_count(), 2);
        assert_eq!(executor.calls()[0].attempt, 1);
    }

    #[tokio::test]
    async fn test_scripted_executor_stages_next() {
        let executor =
            ScriptedExecutor::new(Stage::Transform).staging(Payload::ship("staged.jpg"));
        let payload = Payload::transform("a.jpg", None);
        let job = Job::new(Stage::Transform, payload, Utc::now()).unwrap();
        let ctx = JobContext::new(&job);

        assert!(executor.execute(&ctx, &job.payload).await.is_success());
        assert_eq!(ctx.take_staged(), Some(Payload::ship("staged.jpg")));
    }
}
