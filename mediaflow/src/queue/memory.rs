//! In-process durable queue.

use super::{DurableQueue, Lease, LeaseToken, QueueStats};
use crate::core::{Job, JobId, Stage};
use crate::errors::QueueError;
use crate::utils::{add_duration, duration_until, Clock, SystemClock, Timestamp};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
struct Entry {
    job: Job,
    lease: Option<(LeaseToken, Timestamp)>,
}

/// Queue kept in memory behind a single lock.
///
/// Every operation, including [`ack_and_enqueue`](DurableQueue::ack_and_enqueue),
/// is atomic. Records do not survive the process, so this backend is for
/// tests and single-process runs where "crash" means a dropped dispatch.
#[derive(Debug)]
pub struct InMemoryQueue {
    entries: Mutex<BTreeMap<(JobId, Stage), Entry>>,
    clock: Arc<dyn Clock>,
    notify: Notify,
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryQueue {
    /// Creates an empty queue on the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates an empty queue reading time from `clock`.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
            clock,
            notify: Notify::new(),
        }
    }

    /// Returns the number of records, leased or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if the queue holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Returns a copy of the stored record for `(job_id, stage)`.
    #[must_use]
    pub fn get(&self, job_id: JobId, stage: Stage) -> Option<Job> {
        self.entries
            .lock()
            .get(&(job_id, stage))
            .map(|entry| entry.job.clone())
    }

    /// Returns copies of all stored records.
    #[must_use]
    pub fn jobs(&self) -> Vec<Job> {
        self.entries
            .lock()
            .values()
            .map(|entry| entry.job.clone())
            .collect()
    }

    fn reclaim_expired(entries: &mut BTreeMap<(JobId, Stage), Entry>, now: Timestamp) {
        for entry in entries.values_mut() {
            if matches!(entry.lease, Some((_, expires_at)) if expires_at <= now) {
                warn!(
                    job_id = %entry.job.job_id,
                    stage = %entry.job.stage,
                    attempt = entry.job.attempt,
                    "Lease expired without acknowledgment, reclaiming"
                );
                entry.lease = None;
            }
        }
    }

    fn check_owner(
        entries: &BTreeMap<(JobId, Stage), Entry>,
        lease: &Lease,
    ) -> Result<(), QueueError> {
        match entries.get(&lease.job.key()) {
            Some(Entry {
                lease: Some((token, _)),
                ..
            }) if *token == lease.token => Ok(()),
            _ => Err(QueueError::lease_lost(lease.job_id(), lease.stage())),
        }
    }

    fn insert_new(
        entries: &mut BTreeMap<(JobId, Stage), Entry>,
        job: Job,
    ) -> Result<(), QueueError> {
        let key = job.key();
        if entries.contains_key(&key) {
            return Err(QueueError::Duplicate {
                job_id: key.0,
                stage: key.1,
            });
        }
        entries.insert(key, Entry { job, lease: None });
        Ok(())
    }

    /// Earliest instant at which something becomes leasable or reclaimable.
    fn next_due(&self) -> Option<Timestamp> {
        self.entries
            .lock()
            .values()
            .map(|entry| match entry.lease {
                Some((_, expires_at)) => expires_at,
                None => entry.job.available_at,
            })
            .min()
    }
}

#[async_trait]
impl DurableQueue for InMemoryQueue {
    async fn enqueue(&self, job: Job) -> Result<(), QueueError> {
        debug!(job_id = %job.job_id, stage = %job.stage, "Enqueueing job");
        Self::insert_new(&mut self.entries.lock(), job)?;
        self.notify.notify_one();
        Ok(())
    }

    async fn lease(&self, visibility_timeout: Duration) -> Result<Option<Lease>, QueueError> {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        Self::reclaim_expired(&mut entries, now);

        let next = entries
            .values_mut()
            .filter(|entry| entry.lease.is_none() && entry.job.is_available(now))
            .min_by_key(|entry| (entry.job.available_at, entry.job.enqueued_at));

        Ok(next.map(|entry| {
            let token = LeaseToken::new();
            let expires_at = add_duration(now, visibility_timeout);
            entry.job.deliveries = entry.job.deliveries.saturating_add(1);
            entry.lease = Some((token, expires_at));
            Lease {
                job: entry.job.clone(),
                token,
                expires_at,
            }
        }))
    }

    async fn ack(&self, lease: &Lease) -> Result<(), QueueError> {
        let mut entries = self.entries.lock();
        Self::check_owner(&entries, lease)?;
        entries.remove(&lease.job.key());
        Ok(())
    }

    async fn requeue(&self, lease: &Lease, job: Job) -> Result<(), QueueError> {
        {
            let mut entries = self.entries.lock();
            Self::check_owner(&entries, lease)?;
            entries.insert(lease.job.key(), Entry { job, lease: None });
        }
        self.notify.notify_one();
        Ok(())
    }

    async fn extend_lease(&self, lease: &Lease, timeout: Duration) -> Result<Lease, QueueError> {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        Self::check_owner(&entries, lease)?;

        let expires_at = add_duration(now, timeout);
        if let Some(entry) = entries.get_mut(&lease.job.key()) {
            entry.lease = Some((lease.token, expires_at));
        }
        Ok(Lease {
            expires_at,
            ..lease.clone()
        })
    }

    async fn ack_and_enqueue(&self, lease: &Lease, next: Job) -> Result<(), QueueError> {
        {
            let mut entries = self.entries.lock();
            Self::check_owner(&entries, lease)?;
            match Self::insert_new(&mut entries, next) {
                Ok(()) | Err(QueueError::Duplicate { .. }) => {}
                Err(e) => return Err(e),
            }
            entries.remove(&lease.job.key());
        }
        self.notify.notify_one();
        Ok(())
    }

    fn supports_atomic_transition(&self) -> bool {
        true
    }

    async fn wait_for_work(&self, max_wait: Duration) {
        let wait = self
            .next_due()
            .map_or(max_wait, |due| duration_until(self.clock.now(), due).min(max_wait));
        if wait.is_zero() {
            return;
        }
        let _ = tokio::time::timeout(wait, self.notify.notified()).await;
    }

    async fn stats(&self) -> Result<QueueStats, QueueError> {
        let entries = self.entries.lock();
        let leased = entries.values().filter(|e| e.lease.is_some()).count();
        Ok(QueueStats {
            ready: entries.len() - leased,
            leased,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Payload;
    use crate::testing::ManualClock;

    const VISIBILITY: Duration = Duration::from_secs(30);

    fn queue() -> (Arc<ManualClock>, InMemoryQueue) {
        let clock = Arc::new(ManualClock::default());
        let queue = InMemoryQueue::with_clock(clock.clone());
        (clock, queue)
    }

    fn transform_job(clock: &ManualClock) -> Job {
        Job::new(Stage::Transform, Payload::transform("a.jpg", None), clock.now()).unwrap()
    }

    #[tokio::test]
    async fn test_lease_empty_queue() {
        let (_clock, queue) = queue();
        assert!(queue.lease(VISIBILITY).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lease_hides_record_from_other_workers() {
        let (clock, queue) = queue();
        queue.enqueue(transform_job(&clock)).await.unwrap();

        let lease = queue.lease(VISIBILITY).await.unwrap().unwrap();
        assert_eq!(lease.job.deliveries, 1);
        assert!(queue.lease(VISIBILITY).await.unwrap().is_none());

        let stats = queue.stats().await.unwrap();
        assert_eq!(stats, QueueStats { ready: 0, leased: 1 });
    }

    #[tokio::test]
    async fn test_ack_removes_record() {
        let (clock, queue) = queue();
        queue.enqueue(transform_job(&clock)).await.unwrap();

        let lease = queue.lease(VISIBILITY).await.unwrap().unwrap();
        queue.ack(&lease).await.unwrap();

        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_expired_lease_is_redelivered_with_same_attempt() {
        let (clock, queue) = queue();
        queue.enqueue(transform_job(&clock)).await.unwrap();

        let first = queue.lease(VISIBILITY).await.unwrap().unwrap();
        clock.advance(VISIBILITY);

        let second = queue.lease(VISIBILITY).await.unwrap().unwrap();
        assert_eq!(second.job.job_id, first.job.job_id);
        assert_eq!(second.job.attempt, first.job.attempt);
        assert_eq!(second.job.deliveries, 2);
        assert_ne!(second.token, first.token);
    }

    #[tokio::test]
    async fn test_stale_lease_cannot_ack() {
        let (clock, queue) = queue();
        queue.enqueue(transform_job(&clock)).await.unwrap();

        let stale = queue.lease(VISIBILITY).await.unwrap().unwrap();
        clock.advance(VISIBILITY);
        let fresh = queue.lease(VISIBILITY).await.unwrap().unwrap();

        let err = queue.ack(&stale).await.unwrap_err();
        assert!(err.is_lease_lost());
        queue.ack(&fresh).await.unwrap();
    }

    #[tokio::test]
    async fn test_requeue_delays_redelivery() {
        let (clock, queue) = queue();
        queue
            .enqueue(Job::new(Stage::Ship, Payload::ship("out.jpg"), clock.now()).unwrap())
            .await
            .unwrap();

        let lease = queue.lease(VISIBILITY).await.unwrap().unwrap();
        let retried = lease.job.retry_after(Duration::from_secs(10), clock.now());
        queue.requeue(&lease, retried).await.unwrap();

        assert!(queue.lease(VISIBILITY).await.unwrap().is_none());
        clock.advance(Duration::from_secs(10));

        let again = queue.lease(VISIBILITY).await.unwrap().unwrap();
        assert_eq!(again.job.attempt, 2);
        assert_eq!(again.job.deliveries, 1);
    }

    #[tokio::test]
    async fn test_extend_lease_postpones_reclaim() {
        let (clock, queue) = queue();
        queue.enqueue(transform_job(&clock)).await.unwrap();

        let lease = queue.lease(VISIBILITY).await.unwrap().unwrap();
        clock.advance(Duration::from_secs(20));
        let extended = queue.extend_lease(&lease, VISIBILITY).await.unwrap();
        clock.advance(Duration::from_secs(20));

        assert!(queue.lease(VISIBILITY).await.unwrap().is_none());
        queue.ack(&extended).await.unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_enqueue_rejected() {
        let (clock, queue) = queue();
        let job = transform_job(&clock);
        queue.enqueue(job.clone()).await.unwrap();

        let err = queue.enqueue(job).await.unwrap_err();
        assert!(matches!(err, QueueError::Duplicate { .. }));
    }

    #[tokio::test]
    async fn test_ack_and_enqueue_is_atomic_transition() {
        let (clock, queue) = queue();
        queue.enqueue(transform_job(&clock)).await.unwrap();

        let lease = queue.lease(VISIBILITY).await.unwrap().unwrap();
        let next = lease.job.advance(Payload::ship("out.jpg"), clock.now()).unwrap();
        queue.ack_and_enqueue(&lease, next).await.unwrap();

        assert!(queue.supports_atomic_transition());
        assert!(queue.get(lease.job_id(), Stage::Transform).is_none());
        let ship = queue.get(lease.job_id(), Stage::Ship).unwrap();
        assert_eq!(ship.attempt, 1);
    }

    #[tokio::test]
    async fn test_lease_order_prefers_earliest_available() {
        let (clock, queue) = queue();
        let late = Job::new(Stage::Ship, Payload::ship("late.jpg"), clock.now()).unwrap();
        clock.advance(Duration::from_secs(1));
        let mut early = Job::new(Stage::Ship, Payload::ship("early.jpg"), clock.now()).unwrap();
        early.available_at = late.available_at - chrono::Duration::seconds(1);

        queue.enqueue(late).await.unwrap();
        queue.enqueue(early.clone()).await.unwrap();

        let lease = queue.lease(VISIBILITY).await.unwrap().unwrap();
        assert_eq!(lease.job.job_id, early.job_id);
    }

    #[tokio::test]
    async fn test_wait_for_work_returns_on_enqueue() {
        let queue = Arc::new(InMemoryQueue::new());
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.wait_for_work(Duration::from_secs(30)).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue
            .enqueue(Job::new(Stage::Ship, Payload::ship("out.jpg"), chrono::Utc::now()).unwrap())
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
