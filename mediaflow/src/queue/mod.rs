//! Durable queue contract and implementations.
//!
//! The queue is the only coordination point between workers. It owns the
//! lease mechanism: a leased record is invisible to other workers until it
//! is acknowledged, requeued, or its visibility timeout expires. Expiry is
//! how crashed workers are detected; the record simply becomes leasable
//! again with its `attempt` unchanged.
//!
//! Two implementations are provided:
//! - [`InMemoryQueue`] for single-process use and tests
//! - [`FileQueue`] for worker processes sharing a directory

mod file;
mod memory;

pub use file::FileQueue;
pub use memory::InMemoryQueue;

use crate::core::{Job, JobId, Stage};
use crate::errors::QueueError;
use crate::utils::Timestamp;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug};
use std::time::Duration;
use uuid::Uuid;

/// Proof of ownership for one leased record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LeaseToken(Uuid);

impl LeaseToken {
    /// Generates a fresh token.
    #[must_use]
    pub fn new() -> Self {
        Self(crate::utils::generate_uuid())
    }
}

impl Default for LeaseToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LeaseToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0.simple(), f)
    }
}

/// A time-bounded exclusive claim on a job record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    /// The leased record, with `deliveries` already counting this lease.
    pub job: Job,
    /// Token identifying this particular lease.
    pub token: LeaseToken,
    /// When the queue will reclaim the record if it is not acknowledged.
    pub expires_at: Timestamp,
}

impl Lease {
    /// Returns the leased job id.
    #[must_use]
    pub const fn job_id(&self) -> JobId {
        self.job.job_id
    }

    /// Returns the leased stage.
    #[must_use]
    pub const fn stage(&self) -> Stage {
        self.job.stage
    }

    /// Returns true if the lease has expired at `now`.
    #[must_use]
    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at <= now
    }
}

/// Point-in-time record counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Records waiting to be leased (including delayed ones).
    pub ready: usize,
    /// Records currently leased (including expired, not yet reclaimed).
    pub leased: usize,
}

/// Contract every durable queue backend fulfils.
#[async_trait]
pub trait DurableQueue: Send + Sync + Debug {
    /// Stores a new record.
    ///
    /// Fails with [`QueueError::Duplicate`] if `(job_id, stage)` is already queued or leased.
    async fn enqueue(&self, job: Job) -> Result<(), QueueError>;

    /// Leases the next record whose `available_at` has passed.
    ///
    /// Expired leases are reclaimed first. Returns `None` if nothing is eligible.
    async fn lease(&self, visibility_timeout: Duration) -> Result<Option<Lease>, QueueError>;

    /// Removes a leased record for good.
    async fn ack(&self, lease: &Lease) -> Result<(), QueueError>;

    /// Replaces a leased record with `job` (same key) and releases the lease.
    async fn requeue(&self, lease: &Lease, job: Job) -> Result<(), QueueError>;

    /// Pushes the lease deadline to `now + timeout` and returns the updated lease.
    async fn extend_lease(&self, lease: &Lease, timeout: Duration) -> Result<Lease, QueueError>;

    /// Acknowledges `lease` and enqueues `next` for the following stage.
    ///
    /// The default writes `next` before removing the leased record, so a
    /// crash in between can duplicate the next stage but never lose it. A
    /// `next` record that already exists counts as written.
    async fn ack_and_enqueue(&self, lease: &Lease, next: Job) -> Result<(), QueueError> {
        match self.enqueue(next).await {
            Ok(()) | Err(QueueError::Duplicate { .. }) => {}
            Err(e) => return Err(e),
        }
        self.ack(lease).await
    }

    /// Returns true if [`ack_and_enqueue`](Self::ack_and_enqueue) is a single atomic step.
    fn supports_atomic_transition(&self) -> bool {
        false
    }

    /// Suspends until work may be available, for at most `max_wait`.
    async fn wait_for_work(&self, max_wait: Duration) {
        tokio::time::sleep(max_wait).await;
    }

    /// Returns current record counts.
    async fn stats(&self) -> Result<QueueStats, QueueError>;
}
