//! Job records flowing through the durable queue.

use super::Stage;
use crate::errors::MediaflowError;
use crate::utils::{add_duration, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// Identifier of one unit of work.
///
/// Assigned when the TRANSFORM job is first enqueued and carried unchanged
/// into the SHIP job, so `(job_id, stage)` names a single queue record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    /// Generates a new random job id.
    #[must_use]
    pub fn new() -> Self {
        Self(crate::utils::generate_uuid())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for JobId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Input of the TRANSFORM stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformPayload {
    /// Path of the uploaded source image on shared storage.
    pub file_reference: PathBuf,
    /// Who submitted the file, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submitter: Option<String>,
}

/// Input of the SHIP stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipPayload {
    /// Path of the artifact produced by TRANSFORM.
    pub output_reference: PathBuf,
}

/// Stage-specific, immutable job data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Payload {
    /// Data for [`Stage::Transform`].
    Transform(TransformPayload),
    /// Data for [`Stage::Ship`].
    Ship(ShipPayload),
}

impl Payload {
    /// Builds a TRANSFORM payload.
    #[must_use]
    pub fn transform(file_reference: impl Into<PathBuf>, submitter: Option<String>) -> Self {
        Self::Transform(TransformPayload {
            file_reference: file_reference.into(),
            submitter,
        })
    }

    /// Builds a SHIP payload.
    #[must_use]
    pub fn ship(output_reference: impl Into<PathBuf>) -> Self {
        Self::Ship(ShipPayload {
            output_reference: output_reference.into(),
        })
    }

    /// Returns the stage this payload belongs to.
    #[must_use]
    pub const fn stage(&self) -> Stage {
        match self {
            Self::Transform(_) => Stage::Transform,
            Self::Ship(_) => Stage::Ship,
        }
    }

    /// Returns the file the payload refers to.
    #[must_use]
    pub fn reference(&self) -> &Path {
        match self {
            Self::Transform(p) => &p.file_reference,
            Self::Ship(p) => &p.output_reference,
        }
    }
}

/// A queue record: one stage of one unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Unit-of-work identifier, shared across stages.
    pub job_id: JobId,
    /// Which executor handles this record.
    pub stage: Stage,
    /// Stage input.
    pub payload: Payload,
    /// Policy-governed attempt number, starting at 1.
    pub attempt: u32,
    /// How many times the current attempt has been leased.
    #[serde(default)]
    pub deliveries: u32,
    /// When the record was first written for this stage.
    pub enqueued_at: Timestamp,
    /// Earliest time the record may be leased.
    pub available_at: Timestamp,
}

impl Job {
    /// Creates the first record of a new unit of work.
    ///
    /// # Errors
    ///
    /// Returns [`MediaflowError::StageMismatch`] if `payload` does not belong to `stage`.
    pub fn new(stage: Stage, payload: Payload, now: Timestamp) -> Result<Self, MediaflowError> {
        Self::for_stage(JobId::new(), stage, payload, now)
    }

    /// Creates a fresh attempt-1 record for an existing unit of work.
    ///
    /// # Errors
    ///
    /// Returns [`MediaflowError::StageMismatch`] if `payload` does not belong to `stage`.
    pub fn for_stage(
        job_id: JobId,
        stage: Stage,
        payload: Payload,
        now: Timestamp,
    ) -> Result<Self, MediaflowError> {
        if payload.stage() != stage {
            return Err(MediaflowError::StageMismatch {
                stage,
                payload_stage: payload.stage(),
            });
        }

        Ok(Self {
            job_id,
            stage,
            payload,
            attempt: 1,
            deliveries: 0,
            enqueued_at: now,
            available_at: now,
        })
    }

    /// Builds the record for the stage after this one.
    ///
    /// # Errors
    ///
    /// Returns [`MediaflowError::InvalidTransition`] when this is the last
    /// stage, or [`MediaflowError::StageMismatch`] when `payload` is not for
    /// the next stage.
    pub fn advance(&self, payload: Payload, now: Timestamp) -> Result<Self, MediaflowError> {
        let next = self.stage.next().ok_or(MediaflowError::InvalidTransition {
            from: self.stage,
            to: payload.stage(),
        })?;
        Self::for_stage(self.job_id, next, payload, now)
    }

    /// Returns the record to requeue after a policy-approved retry.
    #[must_use]
    pub fn retry_after(&self, delay: Duration, now: Timestamp) -> Self {
        Self {
            attempt: self.attempt.saturating_add(1),
            deliveries: 0,
            available_at: add_duration(now, delay),
            ..self.clone()
        }
    }

    /// Returns true if the record may be leased at `now`.
    #[must_use]
    pub fn is_available(&self, now: Timestamp) -> bool {
        self.available_at <= now
    }

    /// Returns the `(job_id, stage)` key the queue leases by.
    #[must_use]
    pub const fn key(&self) -> (JobId, Stage) {
        (self.job_id, self.stage)
    }

    /// Number of redeliveries caused by crashes for the current attempt.
    #[must_use]
    pub const fn crash_redeliveries(&self) -> u32 {
        self.deliveries.saturating_sub(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_new_job_starts_at_attempt_one() {
        let now = Utc::now();
        let job = Job::new(Stage::Transform, Payload::transform("a.jpg", None), now).unwrap();

        assert_eq!(job.attempt, 1);
        assert_eq!(job.deliveries, 0);
        assert_eq!(job.available_at, now);
        assert!(job.is_available(now));
    }

    #[test]
    fn test_new_job_rejects_mismatched_payload() {
        let err = Job::new(Stage::Ship, Payload::transform("a.jpg", None), Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            MediaflowError::StageMismatch {
                stage: Stage::Ship,
                payload_stage: Stage::Transform
            }
        ));
    }

    #[test]
    fn test_advance_keeps_job_id_and_resets_attempt() {
        let now = Utc::now();
        let mut job = Job::new(Stage::Transform, Payload::transform("a.jpg", None), now).unwrap();
        job.attempt = 3;
        job.deliveries = 2;

        let next = job.advance(Payload::ship("watermarked_a.jpg"), now).unwrap();

        assert_eq!(next.job_id, job.job_id);
        assert_eq!(next.stage, Stage::Ship);
        assert_eq!(next.attempt, 1);
        assert_eq!(next.deliveries, 0);
    }

    #[test]
    fn test_ship_cannot_advance() {
        let now = Utc::now();
        let job = Job::new(Stage::Ship, Payload::ship("out.jpg"), now).unwrap();

        let err = job.advance(Payload::transform("a.jpg", None), now).unwrap_err();
        assert!(matches!(err, MediaflowError::InvalidTransition { .. }));
    }

    #[test]
    fn test_retry_after_increments_attempt_and_delays() {
        let now = Utc::now();
        let job = Job::new(Stage::Ship, Payload::ship("out.jpg"), now).unwrap();

        let retried = job.retry_after(Duration::from_secs(10), now);

        assert_eq!(retried.job_id, job.job_id);
        assert_eq!(retried.attempt, 2);
        assert!(!retried.is_available(now));
        assert!(retried.is_available(now + chrono::Duration::seconds(10)));
    }

    #[test]
    fn test_payload_serialization_is_tagged() {
        let payload = Payload::ship("out.jpg");
        let json = serde_json::to_value(&payload).unwrap();

        assert_eq!(json["kind"], "ship");
        assert_eq!(json["output_reference"], "out.jpg");
    }

    #[test]
    fn test_job_id_parse() {
        let id = JobId::new();
        let parsed: JobId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }
}
