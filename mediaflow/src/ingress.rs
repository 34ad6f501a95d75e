//! Submission of new images into the pipeline.
//!
//! A submitted file is copied into the shared upload directory and synced
//! before its TRANSFORM job is enqueued, so a worker never leases a job whose
//! source is missing. Stored files are named `<job id>_<original name>`.

use crate::core::{JobId, Payload, Stage};
use crate::errors::MediaflowError;
use crate::scheduler::Scheduler;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Copies `source` into `upload_dir` under a name derived from `job_id`.
///
/// The copy goes through a temporary file in `upload_dir` that is synced and
/// then renamed into place, so a partial copy is never visible.
pub fn persist_upload(
    source: &Path,
    upload_dir: &Path,
    job_id: JobId,
) -> Result<PathBuf, MediaflowError> {
    let name = source.file_name().ok_or_else(|| {
        MediaflowError::upload(
            source,
            io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"),
        )
    })?;
    let mut input =
        std::fs::File::open(source).map_err(|e| MediaflowError::upload(source, e))?;

    std::fs::create_dir_all(upload_dir).map_err(|e| MediaflowError::upload(upload_dir, e))?;
    let dest = upload_dir.join(format!(
        "{}_{}",
        job_id.as_uuid().simple(),
        name.to_string_lossy()
    ));

    let mut temp = tempfile::NamedTempFile::new_in(upload_dir)
        .map_err(|e| MediaflowError::upload(upload_dir, e))?;
    io::copy(&mut input, &mut temp).map_err(|e| MediaflowError::upload(source, e))?;
    temp.flush().map_err(|e| MediaflowError::upload(&dest, e))?;
    temp.as_file()
        .sync_all()
        .map_err(|e| MediaflowError::upload(&dest, e))?;
    temp.persist(&dest)
        .map_err(|e| MediaflowError::upload(&dest, e.error))?;
    Ok(dest)
}

/// Stores `source` and enqueues its TRANSFORM job, returning the job id.
///
/// Nothing is enqueued unless the copy succeeded. If the enqueue itself
/// fails the stored copy is removed again.
pub async fn submit(
    scheduler: &Scheduler,
    source: &Path,
    upload_dir: &Path,
    submitter: Option<String>,
) -> Result<JobId, MediaflowError> {
    let job_id = JobId::new();
    let copy = {
        let source = source.to_path_buf();
        let upload_dir = upload_dir.to_path_buf();
        tokio::task::spawn_blocking(move || persist_upload(&source, &upload_dir, job_id))
    };
    let stored = copy
        .await
        .map_err(|e| MediaflowError::upload(source, io::Error::other(e)))??;

    let payload = Payload::transform(&stored, submitter);
    if let Err(e) = scheduler
        .enqueue_with_id(job_id, Stage::Transform, payload)
        .await
    {
        if let Err(remove) = tokio::fs::remove_file(&stored).await {
            warn!(file = %stored.display(), error = %remove, "Failed to remove orphaned upload");
        }
        return Err(e);
    }

    info!(%job_id, file = %stored.display(), "Upload submitted");
    Ok(job_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executors::ExecutorRegistry;
    use crate::queue::{DurableQueue, InMemoryQueue};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::time::Duration;

    fn scheduler() -> (Scheduler, Arc<InMemoryQueue>) {
        let queue = Arc::new(InMemoryQueue::new());
        (Scheduler::new(queue.clone(), ExecutorRegistry::new()), queue)
    }

    fn dir_entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_persist_upload_copies_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("cat.png");
        std::fs::write(&source, b"png bytes").unwrap();
        let upload_dir = dir.path().join("uploads");
        let job_id = JobId::new();

        let stored = persist_upload(&source, &upload_dir, job_id).unwrap();

        assert_eq!(std::fs::read(&stored).unwrap(), b"png bytes");
        assert_eq!(stored.parent(), Some(upload_dir.as_path()));
        assert_eq!(
            dir_entries(&upload_dir),
            vec![format!("{}_cat.png", job_id.as_uuid().simple())]
        );
    }

    #[test]
    fn test_persist_upload_rejects_missing_source() {
        let dir = tempfile::tempdir().unwrap();
        let upload_dir = dir.path().join("uploads");

        let err = persist_upload(&dir.path().join("gone.png"), &upload_dir, JobId::new())
            .unwrap_err();

        assert!(matches!(
            err,
            MediaflowError::Upload { ref source, .. } if source.kind() == io::ErrorKind::NotFound
        ));
        assert!(!upload_dir.exists());
    }

    #[test]
    fn test_persist_upload_rejects_path_without_name() {
        let dir = tempfile::tempdir().unwrap();
        let err = persist_upload(Path::new("/"), dir.path(), JobId::new()).unwrap_err();
        assert!(err.to_string().contains("no file name"));
    }

    #[tokio::test]
    async fn test_submit_enqueues_transform_for_stored_copy() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("photo.png");
        std::fs::write(&source, b"image").unwrap();
        let upload_dir = dir.path().join("uploads");
        let (scheduler, queue) = scheduler();

        let job_id = submit(&scheduler, &source, &upload_dir, Some("alice".into()))
            .await
            .unwrap();

        let lease = queue.lease(Duration::from_secs(30)).await.unwrap().unwrap();
        assert_eq!(lease.job_id(), job_id);
        assert_eq!(lease.stage(), Stage::Transform);
        let stored = upload_dir.join(format!("{}_photo.png", job_id.as_uuid().simple()));
        assert_eq!(lease.job.payload, Payload::transform(&stored, Some("alice".into())));
        assert_eq!(std::fs::read(stored).unwrap(), b"image");
    }

    #[tokio::test]
    async fn test_submit_missing_source_enqueues_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (scheduler, queue) = scheduler();

        let result = submit(&scheduler, &dir.path().join("gone.png"), dir.path(), None).await;

        assert!(result.is_err());
        let stats = queue.stats().await.unwrap();
        assert_eq!((stats.ready, stats.leased), (0, 0));
    }
}
