//! Retry policy for failed stage executions.
//!
//! The policy is the single place where retry and backoff decisions are
//! made. Executors only classify failures; the scheduler asks the policy
//! what to do with them.
//!
//! Crash redelivery never reaches this module: a worker that dies reports
//! nothing, and the queue's lease expiry hands the job out again.

use crate::core::{FailureKind, Stage};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backoff strategy for retry delays. `attempt` is 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// delay = base * attempt
    #[default]
    Linear,
    /// delay = base
    Constant,
    /// delay = base * 2^(attempt - 1)
    Exponential,
}

impl BackoffStrategy {
    /// Calculates the un-jittered delay in milliseconds for an attempt.
    #[must_use]
    pub fn delay_ms(self, base_ms: u64, attempt: u32) -> u64 {
        match self {
            Self::Linear => base_ms.saturating_mul(u64::from(attempt)),
            Self::Constant => base_ms,
            Self::Exponential => {
                base_ms.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)))
            }
        }
    }
}

/// Jitter strategy to spread simultaneous retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// No jitter
    #[default]
    None,
    /// Random from 0 to delay
    Full,
    /// Half fixed, half random
    Equal,
}

impl JitterStrategy {
    /// Applies jitter to a delay in milliseconds.
    #[must_use]
    pub fn apply(self, delay_ms: u64) -> u64 {
        match self {
            Self::None => delay_ms,
            Self::Full => {
                if delay_ms == 0 {
                    0
                } else {
                    rand::thread_rng().gen_range(0..=delay_ms)
                }
            }
            Self::Equal => {
                let half = delay_ms / 2;
                if half == 0 {
                    delay_ms
                } else {
                    half + rand::thread_rng().gen_range(0..=half)
                }
            }
        }
    }
}

/// What the scheduler should do with a failed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Requeue after the specified delay.
    Retry(Duration),
    /// Do not retry; the job fails terminally.
    Fail,
}

/// Bounded-retry policy for transient failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Highest attempt number that may still be retried.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base delay between retries in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Optional cap on any single delay in milliseconds.
    #[serde(default)]
    pub max_delay_ms: Option<u64>,
    /// Backoff strategy.
    #[serde(default)]
    pub backoff: BackoffStrategy,
    /// Jitter strategy.
    #[serde(default)]
    pub jitter: JitterStrategy,
    /// Stages whose transient failures are retried. Others fail outright.
    #[serde(default = "default_retry_stages")]
    pub retry_stages: Vec<Stage>,
}

const fn default_max_attempts() -> u32 {
    5
}

const fn default_base_delay_ms() -> u64 {
    10_000
}

fn default_retry_stages() -> Vec<Stage> {
    vec![Stage::Ship]
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: None,
            backoff: BackoffStrategy::default(),
            jitter: JitterStrategy::default(),
            retry_stages: default_retry_stages(),
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum retryable attempt.
    #[must_use]
    pub const fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the base delay, saturating at `u64::MAX` milliseconds.
    #[must_use]
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay_ms = saturating_millis(delay);
        self
    }

    /// Sets the delay cap, saturating at `u64::MAX` milliseconds.
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay_ms = Some(saturating_millis(delay));
        self
    }

    /// Sets the backoff strategy.
    #[must_use]
    pub const fn with_backoff(mut self, strategy: BackoffStrategy) -> Self {
        self.backoff = strategy;
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub const fn with_jitter(mut self, strategy: JitterStrategy) -> Self {
        self.jitter = strategy;
        self
    }

    /// Sets which stages retry transient failures.
    #[must_use]
    pub fn with_retry_stages(mut self, stages: impl IntoIterator<Item = Stage>) -> Self {
        self.retry_stages = stages.into_iter().collect();
        self
    }

    /// Returns the base delay.
    #[must_use]
    pub const fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    /// Returns true if transient failures of `stage` are retried at all.
    #[must_use]
    pub fn retries_stage(&self, stage: Stage) -> bool {
        self.retry_stages.contains(&stage)
    }

    /// Calculates the delay before redelivering after `attempt` failed.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let mut delay = self.backoff.delay_ms(self.base_delay_ms, attempt);
        if let Some(cap) = self.max_delay_ms {
            delay = delay.min(cap);
        }
        Duration::from_millis(self.jitter.apply(delay))
    }

    /// Decides what happens to a job whose `attempt` just failed with `kind`.
    #[must_use]
    pub fn decide(&self, stage: Stage, attempt: u32, kind: FailureKind) -> RetryDecision {
        match kind {
            FailureKind::Permanent => RetryDecision::Fail,
            FailureKind::Transient if !self.retries_stage(stage) => RetryDecision::Fail,
            FailureKind::Transient if attempt > self.max_attempts => RetryDecision::Fail,
            FailureKind::Transient => RetryDecision::Retry(self.delay_for(attempt)),
        }
    }
}

fn saturating_millis(delay: Duration) -> u64 {
    u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)
}
