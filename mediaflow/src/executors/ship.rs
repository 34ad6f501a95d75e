//! SHIP stage: upload the artifact to the receiving service.

use super::{ExecutionContext, StageExecutor};
use crate::config::ShipConfig;
use crate::core::{Outcome, Payload, Stage};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use std::io;
use std::time::Duration;
use tracing::{info, warn};

/// Statuses that mean "try again later" rather than "never".
const RETRYABLE_STATUSES: [StatusCode; 4] = [
    StatusCode::TOO_MANY_REQUESTS,
    StatusCode::BAD_GATEWAY,
    StatusCode::SERVICE_UNAVAILABLE,
    StatusCode::GATEWAY_TIMEOUT,
];

/// Classifies a receiver response status.
#[must_use]
pub fn classify_status(status: StatusCode) -> Outcome {
    if status.is_success() {
        Outcome::success()
    } else if RETRYABLE_STATUSES.contains(&status) {
        Outcome::transient("server_unavailable")
    } else {
        Outcome::permanent("upload_rejected")
    }
}

/// POSTs the artifact as multipart form data (`file` + `worker_name`).
#[derive(Debug, Clone)]
pub struct ShipExecutor {
    client: reqwest::Client,
    endpoint: String,
    worker_name: String,
    timeout: Duration,
}

impl ShipExecutor {
    /// Creates an executor posting to `endpoint` with a 15 s timeout.
    #[must_use]
    pub fn new(
        client: reqwest::Client,
        endpoint: impl Into<String>,
        worker_name: impl Into<String>,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            worker_name: worker_name.into(),
            timeout: Duration::from_secs(15),
        }
    }

    /// Creates an executor from configuration.
    #[must_use]
    pub fn from_config(
        client: reqwest::Client,
        config: &ShipConfig,
        worker_name: impl Into<String>,
    ) -> Self {
        Self::new(client, config.endpoint.clone(), worker_name)
            .with_timeout(Duration::from_secs(config.timeout_seconds))
    }

    /// Sets the per-request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the receiver URL.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl StageExecutor for ShipExecutor {
    fn stage(&self) -> Stage {
        Stage::Ship
    }

    async fn execute(&self, ctx: &dyn ExecutionContext, payload: &Payload) -> Outcome {
        let Payload::Ship(input) = payload else {
            return Outcome::permanent("unexpected_payload");
        };
        let job_id = ctx.job_id();
        let path = &input.output_reference;

        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!(%job_id, path = %path.display(), "Artifact not found");
                return Outcome::permanent("artifact_not_found");
            }
            Err(e) => {
                warn!(%job_id, path = %path.display(), error = %e, "Artifact unreadable");
                return Outcome::transient("storage_unavailable");
            }
        };

        let file_name = path
            .file_name()
            .map_or_else(|| "artifact.jpg".to_string(), |n| n.to_string_lossy().into_owned());
        let part = match Part::bytes(bytes).file_name(file_name.clone()).mime_str("image/jpeg") {
            Ok(part) => part,
            Err(e) => {
                warn!(%job_id, error = %e, "Failed to build upload");
                return Outcome::permanent("invalid_request");
            }
        };
        let form = Form::new()
            .part("file", part)
            .text("worker_name", self.worker_name.clone());

        let response = self
            .client
            .post(&self.endpoint)
            .timeout(self.timeout)
            .multipart(form)
            .send()
            .await;

        match response {
            Ok(response) => {
                let status = response.status();
                let outcome = classify_status(status);
                if outcome.is_success() {
                    info!(
                        %job_id,
                        file = %file_name,
                        status = status.as_u16(),
                        attempt = ctx.attempt(),
                        "Artifact shipped"
                    );
                } else {
                    warn!(
                        %job_id,
                        status = status.as_u16(),
                        attempt = ctx.attempt(),
                        "Receiver refused artifact"
                    );
                }
                outcome
            }
            Err(e) if e.is_builder() => {
                warn!(%job_id, endpoint = %self.endpoint, error = %e, "Invalid receiver endpoint");
                Outcome::permanent("invalid_request")
            }
            Err(e) => {
                warn!(
                    %job_id,
                    endpoint = %self.endpoint,
                    attempt = ctx.attempt(),
                    error = %e,
                    "Receiver unreachable"
                );
                Outcome::transient("server_unreachable")
            }
        }
    }
}
