//! Directory-backed durable queue shared by worker processes.
//!
//! Layout under the queue root:
//!
//! ```text
//! ready/<job_id>.<stage>.json                         waiting records
//! leased/<job_id>.<stage>.<token>.<deadline_ms>.json  leased records
//! ```
//!
//! Every record write goes through a synced temporary file that is renamed
//! into place, so readers never observe a partial record. Claiming a record
//! is a single `rename` from `ready/` to `leased/`; only one process can win
//! it. The lease deadline lives in the file name, so a lease is complete the
//! moment the rename succeeds and any worker can reclaim it once the deadline
//! passes. Reclaiming starts with another `rename`, from the expired lease
//! name to a short-lived reclaim lease, so exactly one process moves each
//! expired record. The move back into `ready/` then uses `hard_link` +
//! `remove` so it never overwrites a record that is already waiting there.

use super::{DurableQueue, Lease, LeaseToken, QueueStats};
use crate::core::{Job, JobId, Stage};
use crate::errors::QueueError;
use crate::utils::{add_duration, Clock, SystemClock, Timestamp};
use async_trait::async_trait;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const READY_DIR: &str = "ready";
const LEASED_DIR: &str = "leased";
const RECLAIM_TOKEN_PREFIX: &str = "reclaim-";
/// How long a reclaiming process may hold an expired record before others
/// treat the reclaim itself as crashed.
const RECLAIM_GRACE: Duration = Duration::from_secs(30);

/// Parsed name of a leased record.
#[derive(Debug, Clone, PartialEq, Eq)]
struct LeasedName {
    job_id: JobId,
    stage: Stage,
    token: String,
    deadline_ms: i64,
}

impl LeasedName {
    fn parse(name: &str) -> Option<Self> {
        let stem = name.strip_suffix(".json")?;
        let mut parts = stem.split('.');
        let job_id = parts.next()?.parse().ok()?;
        let stage = parts.next()?.parse().ok()?;
        let token = parts.next()?.to_string();
        let deadline_ms = parts.next()?.parse().ok()?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self {
            job_id,
            stage,
            token,
            deadline_ms,
        })
    }

    fn file_name(&self) -> String {
        format!(
            "{}.{}.{}.{}.json",
            self.job_id, self.stage, self.token, self.deadline_ms
        )
    }

    fn for_lease(lease: &Lease) -> Self {
        Self {
            job_id: lease.job_id(),
            stage: lease.stage(),
            token: lease.token.to_string(),
            deadline_ms: lease.expires_at.timestamp_millis(),
        }
    }
}

fn ready_name(job_id: JobId, stage: Stage) -> String {
    format!("{job_id}.{stage}.json")
}

fn parse_ready_name(name: &str) -> Option<(JobId, Stage)> {
    let stem = name.strip_suffix(".json")?;
    let (job_id, stage) = stem.split_once('.')?;
    Some((job_id.parse().ok()?, stage.parse().ok()?))
}

/// Filesystem state, shared with blocking tasks.
#[derive(Debug)]
struct Dirs {
    root: PathBuf,
    ready: PathBuf,
    leased: PathBuf,
}

impl Dirs {
    fn ready_path(&self, job_id: JobId, stage: Stage) -> PathBuf {
        self.ready.join(ready_name(job_id, stage))
    }

    fn leased_path(&self, name: &LeasedName) -> PathBuf {
        self.leased.join(name.file_name())
    }

    fn read_job(path: &Path) -> Result<Job, QueueError> {
        let bytes = fs::read(path)?;
        serde_json::from_slice(&bytes).map_err(|e| QueueError::Corrupt {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Writes `job` to a synced temp file in `dir`.
    fn write_temp(dir: &Path, job: &Job) -> Result<tempfile::NamedTempFile, QueueError> {
        let bytes = serde_json::to_vec_pretty(job).map_err(|e| QueueError::Corrupt {
            path: dir.to_path_buf(),
            reason: e.to_string(),
        })?;
        let mut file = tempfile::NamedTempFile::new_in(dir)?;
        file.write_all(&bytes)?;
        file.as_file().sync_all()?;
        Ok(file)
    }

    /// Places `job` under `ready/` unless a record with the same key is already there.
    fn write_ready_noclobber(&self, job: &Job) -> Result<(), QueueError> {
        let target = self.ready_path(job.job_id, job.stage);
        let file = Self::write_temp(&self.ready, job)?;
        file.persist_noclobber(&target).map_err(|e| {
            if e.error.kind() == io::ErrorKind::AlreadyExists {
                QueueError::Duplicate {
                    job_id: job.job_id,
                    stage: job.stage,
                }
            } else {
                QueueError::Io(e.error)
            }
        })?;
        Ok(())
    }

    fn leased_names(&self) -> Result<Vec<LeasedName>, QueueError> {
        Ok(list_names(&self.leased)?
            .iter()
            .filter_map(|name| LeasedName::parse(name))
            .collect())
    }

    fn ready_keys(&self) -> Result<Vec<(JobId, Stage)>, QueueError> {
        Ok(list_names(&self.ready)?
            .iter()
            .filter_map(|name| parse_ready_name(name))
            .collect())
    }

    fn is_leased(&self, job_id: JobId, stage: Stage) -> Result<bool, QueueError> {
        Ok(self
            .leased_names()?
            .iter()
            .any(|name| name.job_id == job_id && name.stage == stage))
    }

    /// Moves expired leases back to `ready/`, keeping their attempt.
    fn reclaim_expired(&self, now: Timestamp) -> Result<usize, QueueError> {
        let now_ms = now.timestamp_millis();
        let names = self.leased_names()?;
        let mut reclaimed = 0;

        for name in names.iter().filter(|name| name.deadline_ms <= now_ms) {
            let Some(claimed) = self.claim_expired(name, now)? else {
                continue;
            };
            let superseded = names.iter().any(|other| {
                other.job_id == name.job_id
                    && other.stage == name.stage
                    && other.deadline_ms > now_ms
            });
            if self.restore_claimed(&claimed, superseded)? {
                warn!(
                    job_id = %name.job_id,
                    stage = %name.stage,
                    "Lease expired without acknowledgment, reclaiming"
                );
                reclaimed += 1;
            }
        }

        Ok(reclaimed)
    }

    /// Renames an expired lease to a short reclaim lease owned by this process.
    ///
    /// Returns `None` when the holder acked or another process claimed it first.
    fn claim_expired(
        &self,
        name: &LeasedName,
        now: Timestamp,
    ) -> Result<Option<LeasedName>, QueueError> {
        let claimed = LeasedName {
            token: format!("{RECLAIM_TOKEN_PREFIX}{}", LeaseToken::new()),
            deadline_ms: add_duration(now, RECLAIM_GRACE).timestamp_millis(),
            ..name.clone()
        };
        match fs::rename(self.leased_path(name), self.leased_path(&claimed)) {
            Ok(()) => Ok(Some(claimed)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Links a claimed record into `ready/`, then drops the claim.
    ///
    /// A claim whose key is already leased elsewhere, or already waiting in
    /// `ready/`, is dropped without being restored.
    fn restore_claimed(&self, claimed: &LeasedName, superseded: bool) -> Result<bool, QueueError> {
        let source = self.leased_path(claimed);
        let restored = if superseded {
            false
        } else {
            match fs::hard_link(&source, self.ready_path(claimed.job_id, claimed.stage)) {
                Ok(()) => true,
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => false,
                Err(e) => return Err(e.into()),
            }
        };
        remove_if_exists(&source)?;
        Ok(restored)
    }

    fn lease(
        &self,
        now: Timestamp,
        visibility_timeout: Duration,
    ) -> Result<Option<Lease>, QueueError> {
        self.reclaim_expired(now)?;

        let mut candidates = Vec::new();
        for (job_id, stage) in self.ready_keys()? {
            let path = self.ready_path(job_id, stage);
            match Self::read_job(&path) {
                Ok(job) if job.is_available(now) => candidates.push(job),
                Ok(_) => {}
                Err(QueueError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        candidates.sort_by_key(|job| (job.available_at, job.enqueued_at));

        let expires_at = add_duration(now, visibility_timeout);
        for mut job in candidates {
            let token = LeaseToken::new();
            let lease = Lease {
                job: job.clone(),
                token,
                expires_at,
            };
            let leased_path = self.leased_path(&LeasedName::for_lease(&lease));

            match fs::rename(self.ready_path(job.job_id, job.stage), &leased_path) {
                Ok(()) => {}
                // Another worker claimed it first.
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            }

            job.deliveries = job.deliveries.saturating_add(1);
            Self::write_temp(&self.leased, &job)?
                .persist(&leased_path)
                .map_err(|e| QueueError::Io(e.error))?;

            return Ok(Some(Lease { job, ..lease }));
        }

        Ok(None)
    }

    fn ack(&self, lease: &Lease) -> Result<(), QueueError> {
        match fs::remove_file(self.leased_path(&LeasedName::for_lease(lease))) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(QueueError::lease_lost(lease.job_id(), lease.stage()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn requeue(&self, lease: &Lease, job: &Job) -> Result<(), QueueError> {
        let leased_path = self.leased_path(&LeasedName::for_lease(lease));
        if !leased_path.exists() {
            return Err(QueueError::lease_lost(lease.job_id(), lease.stage()));
        }
        match self.write_ready_noclobber(job) {
            Ok(()) => {}
            Err(QueueError::Duplicate { .. }) => {
                return Err(QueueError::lease_lost(lease.job_id(), lease.stage()));
            }
            Err(e) => return Err(e),
        }
        remove_if_exists(&leased_path)
    }

    fn extend(&self, lease: &Lease, expires_at: Timestamp) -> Result<Lease, QueueError> {
        let extended = Lease {
            expires_at,
            ..lease.clone()
        };
        match fs::rename(
            self.leased_path(&LeasedName::for_lease(lease)),
            self.leased_path(&LeasedName::for_lease(&extended)),
        ) {
            Ok(()) => Ok(extended),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(QueueError::lease_lost(lease.job_id(), lease.stage()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn stats(&self) -> Result<QueueStats, QueueError> {
        Ok(QueueStats {
            ready: self.ready_keys()?.len(),
            leased: self.leased_names()?.len(),
        })
    }
}

fn list_names(dir: &Path) -> Result<Vec<String>, QueueError> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if let Some(name) = entry.file_name().to_str() {
            names.push(name.to_string());
        }
    }
    Ok(names)
}

fn remove_if_exists(path: &Path) -> Result<(), QueueError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Queue stored as JSON records in a directory.
///
/// Any number of worker processes may share one root, as long as the
/// filesystem provides atomic `rename` and `link` (local disks and most
/// network filesystems do). Lease scans read every waiting record, which is
/// fine for the upload volumes this pipeline handles.
#[derive(Debug, Clone)]
pub struct FileQueue {
    dirs: Arc<Dirs>,
    clock: Arc<dyn Clock>,
}

impl FileQueue {
    /// Opens (creating if needed) a queue rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory layout cannot be created.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, QueueError> {
        Self::open_with_clock(root, Arc::new(SystemClock))
    }

    /// Opens a queue reading time from `clock`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory layout cannot be created.
    pub fn open_with_clock(
        root: impl Into<PathBuf>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, QueueError> {
        let root = root.into();
        let dirs = Dirs {
            ready: root.join(READY_DIR),
            leased: root.join(LEASED_DIR),
            root,
        };
        fs::create_dir_all(&dirs.ready)?;
        fs::create_dir_all(&dirs.leased)?;
        debug!(root = %dirs.root.display(), "Opened file queue");

        Ok(Self {
            dirs: Arc::new(dirs),
            clock,
        })
    }

    /// Returns the queue root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.dirs.root
    }

    /// Runs filesystem work off the async runtime.
    async fn blocking<T, F>(&self, op: F) -> Result<T, QueueError>
    where
        T: Send + 'static,
        F: FnOnce(&Dirs) -> Result<T, QueueError> + Send + 'static,
    {
        let dirs = self.dirs.clone();
        tokio::task::spawn_blocking(move || op(&dirs))
            .await
            .map_err(|e| QueueError::Io(io::Error::other(e)))?
    }
}

#[async_trait]
impl DurableQueue for FileQueue {
    async fn enqueue(&self, job: Job) -> Result<(), QueueError> {
        debug!(job_id = %job.job_id, stage = %job.stage, "Enqueueing job");
        self.blocking(move |dirs| {
            if dirs.is_leased(job.job_id, job.stage)? {
                return Err(QueueError::Duplicate {
                    job_id: job.job_id,
                    stage: job.stage,
                });
            }
            dirs.write_ready_noclobber(&job)
        })
        .await
    }

    async fn lease(&self, visibility_timeout: Duration) -> Result<Option<Lease>, QueueError> {
        let now = self.clock.now();
        self.blocking(move |dirs| dirs.lease(now, visibility_timeout))
            .await
    }

    async fn ack(&self, lease: &Lease) -> Result<(), QueueError> {
        let lease = lease.clone();
        self.blocking(move |dirs| dirs.ack(&lease)).await
    }

    async fn requeue(&self, lease: &Lease, job: Job) -> Result<(), QueueError> {
        let lease = lease.clone();
        self.blocking(move |dirs| dirs.requeue(&lease, &job)).await
    }

    async fn extend_lease(&self, lease: &Lease, timeout: Duration) -> Result<Lease, QueueError> {
        let lease = lease.clone();
        let expires_at = add_duration(self.clock.now(), timeout);
        self.blocking(move |dirs| dirs.extend(&lease, expires_at))
            .await
    }

    async fn stats(&self) -> Result<QueueStats, QueueError> {
        self.blocking(Dirs::stats).await
    }
}
