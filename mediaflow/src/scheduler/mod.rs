//! Pipeline scheduler.
//!
//! The scheduler leases one job at a time, hands it to the executor for its
//! stage, and turns the returned [`Outcome`] into a queue transition:
//!
//! | Outcome                         | Transition                                  |
//! |---------------------------------|---------------------------------------------|
//! | success, more stages            | enqueue next stage (attempt 1), ack         |
//! | success, last stage             | ack                                         |
//! | failure, policy says retry      | requeue with `attempt + 1` after the delay  |
//! | failure, policy says fail       | ack, emit [`TerminalFailure`]               |
//!
//! A worker that dies mid-job reports nothing. The queue notices the expired
//! lease and hands the same attempt to the next worker that asks.

mod disposition;


pub use crate::errors::TerminalFailure;
pub use disposition::{Disposition, WorkerStats};

use crate::cancellation::CancellationToken;
use crate::config::QueueConfig;
use crate::core::{FailureKind, Job, JobId, Outcome, Payload, Stage};
use crate::errors::MediaflowError;
use crate::events::{
    EventSink, NoOpEventSink, JOB_ADVANCED, JOB_COMPLETED, JOB_FAILED, JOB_LEASED,
    JOB_RETRY_SCHEDULED,
};
use crate::executors::{ExecutorRegistry, JobContext};
use crate::observability::SpanTimer;
use crate::queue::{DurableQueue, Lease};
use crate::retry::{RetryDecision, RetryPolicy};
use crate::utils::{Clock, SystemClock};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Lease and loop timing for a [`Scheduler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Lease length; must exceed the slowest executor run.
    pub visibility_timeout: Duration,
    /// Longest idle wait between lease attempts.
    pub poll_interval: Duration,
    /// Terminal failure once one attempt has been redelivered this many times.
    pub max_crash_redeliveries: Option<u32>,
    /// Extend the lease at this interval while a job runs.
    pub heartbeat_interval: Option<Duration>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::from(&QueueConfig::default())
    }
}

impl From<&QueueConfig> for SchedulerConfig {
    fn from(config: &QueueConfig) -> Self {
        Self {
            visibility_timeout: config.visibility_timeout(),
            poll_interval: config.poll_interval(),
            max_crash_redeliveries: config.max_crash_redeliveries,
            heartbeat_interval: config.heartbeat_interval(),
        }
    }
}

fn job_event(job: &Job) -> Value {
    json!({
        "job_id": job.job_id,
        "stage": job.stage,
        "attempt": job.attempt,
    })
}

/// Orchestrates leasing, dispatch, and outcome handling for one worker.
///
/// Everything the scheduler touches is injected: the queue, executors,
/// retry policy, event sink, and clock.
pub struct Scheduler {
    queue: Arc<dyn DurableQueue>,
    executors: ExecutorRegistry,
    policy: RetryPolicy,
    events: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("queue", &self.queue)
            .field("executors", &self.executors)
            .field("policy", &self.policy)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    /// Creates a scheduler with default policy, no-op events and the system clock.
    #[must_use]
    pub fn new(queue: Arc<dyn DurableQueue>, executors: ExecutorRegistry) -> Self {
        Self {
            queue,
            executors,
            policy: RetryPolicy::default(),
            events: Arc::new(NoOpEventSink),
            clock: Arc::new(SystemClock),
            config: SchedulerConfig::default(),
        }
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Sets the clock. Should be the same clock the queue uses.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Sets lease and loop timing.
    #[must_use]
    pub const fn with_config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the visibility timeout.
    #[must_use]
    pub const fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.config.visibility_timeout = timeout;
        self
    }

    /// Caps crash redeliveries per attempt.
    #[must_use]
    pub const fn with_max_crash_redeliveries(mut self, cap: u32) -> Self {
        self.config.max_crash_redeliveries = Some(cap);
        self
    }

    /// Returns the queue.
    #[must_use]
    pub fn queue(&self) -> &Arc<dyn DurableQueue> {
        &self.queue
    }

    /// Returns the retry policy.
    #[must_use]
    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Enqueues a fresh attempt-1 job and returns its id.
    ///
    /// Callers must have persisted any file the payload refers to.
    pub async fn enqueue(&self, stage: Stage, payload: Payload) -> Result<JobId, MediaflowError> {
        self.enqueue_with_id(JobId::new(), stage, payload).await
    }

    /// Enqueues a fresh attempt-1 job under an id the caller already chose.
    pub async fn enqueue_with_id(
        &self,
        job_id: JobId,
        stage: Stage,
        payload: Payload,
    ) -> Result<JobId, MediaflowError> {
        let job = Job::for_stage(job_id, stage, payload, self.clock.now())?;
        self.queue.enqueue(job).await?;
        info!(%job_id, %stage, "Job enqueued");
        Ok(job_id)
    }

    /// Leases the next eligible job, if any.
    pub async fn lease_next(&self) -> Result<Option<Lease>, MediaflowError> {
        let Some(lease) = self.queue.lease(self.config.visibility_timeout).await? else {
            return Ok(None);
        };
        debug!(
            job_id = %lease.job_id(),
            stage = %lease.stage(),
            attempt = lease.job.attempt,
            deliveries = lease.job.deliveries,
            "Job leased"
        );
        let mut data = job_event(&lease.job);
        data["deliveries"] = json!(lease.job.deliveries);
        self.events.emit(JOB_LEASED, Some(data)).await;
        Ok(Some(lease))
    }

    /// Runs the executor registered for `job.stage`.
    ///
    /// A follow-up staged through the context is used when the outcome
    /// carries none of its own.
    pub async fn dispatch(&self, job: &Job) -> Outcome {
        let Some(executor) = self.executors.get(job.stage) else {
            error!(job_id = %job.job_id, stage = %job.stage, "No executor registered");
            return Outcome::permanent("no_executor");
        };

        let ctx = JobContext::new(job);
        let timer = SpanTimer::start();
        let outcome = executor.execute(&ctx, &job.payload).await;
        debug!(
            job_id = %job.job_id,
            stage = %job.stage,
            attempt = job.attempt,
            duration_ms = timer.elapsed_ms(),
            outcome = %outcome,
            "Executor finished"
        );

        match outcome {
            Outcome::Success { next: None } => match ctx.take_staged() {
                Some(staged) => Outcome::success_with(staged),
                None => Outcome::success(),
            },
            other => other,
        }
    }

    /// Dispatches while periodically extending the lease, if configured.
    async fn dispatch_leased(&self, lease: Lease) -> (Outcome, Lease) {
        let Some(interval) = self.config.heartbeat_interval else {
            let outcome = self.dispatch(&lease.job).await;
            return (outcome, lease);
        };

        let job = lease.job.clone();
        let mut current = lease;
        let work = self.dispatch(&job);
        tokio::pin!(work);

        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                outcome = &mut work => return (outcome, current),
                _ = ticker.tick() => {
                    match self.queue.extend_lease(&current, self.config.visibility_timeout).await {
                        Ok(extended) => current = extended,
                        Err(e) => warn!(job_id = %job.job_id, error = %e, "Lease heartbeat failed"),
                    }
                }
            }
        }
    }

    /// Applies `outcome` to the leased job.
    pub async fn on_outcome(
        &self,
        lease: &Lease,
        outcome: Outcome,
    ) -> Result<Disposition, MediaflowError> {
        let job = &lease.job;

        let (kind, reason) = match outcome {
            Outcome::Success { next } => return self.on_success(lease, next).await,
            Outcome::TransientFailure { reason } => (FailureKind::Transient, reason),
            Outcome::PermanentFailure { reason } => (FailureKind::Permanent, reason),
        };

        match self.policy.decide(job.stage, job.attempt, kind) {
            RetryDecision::Retry(delay) => {
                let retried = job.retry_after(delay, self.clock.now());
                let attempt = retried.attempt;
                self.queue.requeue(lease, retried).await?;

                let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
                warn!(
                    job_id = %job.job_id,
                    stage = %job.stage,
                    attempt = job.attempt,
                    delay_ms,
                    %reason,
                    "Attempt failed, retry scheduled"
                );
                let mut data = job_event(job);
                data["next_attempt"] = json!(attempt);
                data["delay_ms"] = json!(delay_ms);
                data["reason"] = json!(reason);
                self.events.emit(JOB_RETRY_SCHEDULED, Some(data)).await;

                Ok(Disposition::Retrying { attempt, delay })
            }
            RetryDecision::Fail => self.fail(lease, reason).await,
        }
    }

    async fn on_success(
        &self,
        lease: &Lease,
        next: Option<Payload>,
    ) -> Result<Disposition, MediaflowError> {
        let job = &lease.job;

        let Some(next_stage) = job.stage.next() else {
            if next.is_some() {
                warn!(job_id = %job.job_id, "Final stage returned a follow-up payload; ignored");
            }
            self.queue.ack(lease).await?;
            info!(job_id = %job.job_id, stage = %job.stage, attempt = job.attempt, "Job completed");
            self.events.emit(JOB_COMPLETED, Some(job_event(job))).await;
            return Ok(Disposition::Completed);
        };

        let Some(payload) = next else {
            return self.fail(lease, "missing_next_payload").await;
        };
        let next_job = match job.advance(payload, self.clock.now()) {
            Ok(next_job) => next_job,
            Err(e) => {
                warn!(job_id = %job.job_id, error = %e, "Follow-up payload rejected");
                return self.fail(lease, "invalid_next_payload").await;
            }
        };

        self.queue.ack_and_enqueue(lease, next_job).await?;
        info!(
            job_id = %job.job_id,
            stage = %job.stage,
            %next_stage,
            "Stage succeeded, next stage enqueued"
        );
        let mut data = job_event(job);
        data["next_stage"] = json!(next_stage);
        self.events.emit(JOB_ADVANCED, Some(data)).await;
        Ok(Disposition::Advanced { next_stage })
    }

    async fn fail(
        &self,
        lease: &Lease,
        reason: impl Into<String>,
    ) -> Result<Disposition, MediaflowError> {
        let job = &lease.job;
        self.queue.ack(lease).await?;

        let failure = TerminalFailure::new(job.job_id, job.stage, job.attempt, reason);
        error!(
            job_id = %failure.job_id,
            stage = %failure.stage,
            attempt = failure.attempt,
            reason = %failure.reason,
            "Job failed terminally"
        );
        self.events
            .emit(JOB_FAILED, Some(failure.to_event_data()))
            .await;
        Ok(Disposition::Failed(failure))
    }

    /// Leases, dispatches and settles at most one job.
    ///
    /// Returns `None` when nothing was eligible.
    pub async fn run_once(&self) -> Result<Option<Disposition>, MediaflowError> {
        let Some(lease) = self.lease_next().await? else {
            return Ok(None);
        };

        if let Some(cap) = self.config.max_crash_redeliveries {
            if lease.job.crash_redeliveries() > cap {
                warn!(
                    job_id = %lease.job_id(),
                    stage = %lease.stage(),
                    deliveries = lease.job.deliveries,
                    "Crash redelivery cap reached"
                );
                return self.fail(&lease, "crash_loop").await.map(Some);
            }
        }

        let (outcome, lease) = self.dispatch_leased(lease).await;
        self.on_outcome(&lease, outcome).await.map(Some)
    }

    /// Runs jobs until none is eligible right now.
    pub async fn run_until_idle(&self) -> Result<Vec<Disposition>, MediaflowError> {
        let mut dispositions = Vec::new();
        while let Some(disposition) = self.run_once().await? {
            dispositions.push(disposition);
        }
        Ok(dispositions)
    }

    /// Runs the worker loop until `shutdown` is cancelled.
    ///
    /// Shutdown is only observed between jobs. Queue errors are logged and
    /// followed by one poll interval of back-off.
    pub async fn run(&self, shutdown: &CancellationToken) -> WorkerStats {
        let mut stats = WorkerStats::default();
        let poll_interval_ms =
            u64::try_from(self.config.poll_interval.as_millis()).unwrap_or(u64::MAX);
        info!(
            visibility_timeout_s = self.config.visibility_timeout.as_secs(),
            poll_interval_ms,
            "Worker started"
        );

        while !shutdown.is_cancelled() {
            match self.run_once().await {
                Ok(Some(disposition)) => stats.record(&disposition),
                Ok(None) => {
                    tokio::select! {
                        () = self.queue.wait_for_work(self.config.poll_interval) => {}
                        () = shutdown.cancelled() => {}
                    }
                }
                Err(MediaflowError::Queue(e)) if e.is_lease_lost() => {
                    stats.errors += 1;
                    warn!(error = %e, "Lease lost before the outcome was recorded");
                }
                Err(e) => {
                    stats.errors += 1;
                    error!(error = %e, "Worker iteration failed");
                    tokio::select! {
                        () = tokio::time::sleep(self.config.poll_interval) => {}
                        () = shutdown.cancelled() => {}
                    }
                }
            }
        }

        info!(
            reason = shutdown.reason().as_deref().unwrap_or("unknown"),
            processed = stats.processed(),
            "Worker stopped"
        );
        stats
    }
}
