//! TRANSFORM stage: watermark the uploaded image.

use super::compose::{self, ComposeError, DEFAULT_JPEG_QUALITY};
use super::{ExecutionContext, StageExecutor};
use crate::config::TransformConfig;
use crate::core::{FailureKind, Outcome, Payload, Stage};
use async_trait::async_trait;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Why a watermark could not be obtained.
#[derive(Debug, Error)]
pub enum WatermarkError {
    /// The request never produced a response (DNS, connect, timeout).
    #[error("Watermark request failed: {0}")]
    Request(String),

    /// The server answered with a non-success status.
    #[error("Watermark server returned HTTP {0}")]
    Status(u16),

    /// Reading a local watermark failed.
    #[error("Watermark could not be read: {0}")]
    Io(#[from] io::Error),
}

impl WatermarkError {
    /// Client errors are permanent; everything else may clear up.
    #[must_use]
    pub const fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Status(code) if *code >= 400 && *code < 500 => FailureKind::Permanent,
            _ => FailureKind::Transient,
        }
    }
}

/// Supplies watermark image bytes.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WatermarkSource: Send + Sync {
    /// Returns the encoded watermark image.
    async fn fetch(&self) -> Result<Vec<u8>, WatermarkError>;

    /// Where the watermark comes from, for logs.
    fn describe(&self) -> String;
}

/// Downloads the watermark over HTTP on every call.
#[derive(Debug, Clone)]
pub struct HttpWatermarkSource {
    client: reqwest::Client,
    url: String,
}

impl HttpWatermarkSource {
    /// Creates a source using an existing client.
    #[must_use]
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    /// Builds a client with the configured timeout and user agent.
    pub fn from_config(config: &TransformConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.fetch_timeout_seconds))
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self::new(client, config.watermark_url.clone()))
    }
}

#[async_trait]
impl WatermarkSource for HttpWatermarkSource {
    async fn fetch(&self) -> Result<Vec<u8>, WatermarkError> {
        debug!(url = %self.url, "Downloading watermark");
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| WatermarkError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(WatermarkError::Status(status.as_u16()));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| WatermarkError::Request(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

/// Serves fixed watermark bytes, for offline runs and tests.
#[derive(Debug, Clone)]
pub struct StaticWatermarkSource {
    bytes: Arc<Vec<u8>>,
}

impl StaticWatermarkSource {
    /// Wraps in-memory image bytes.
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Arc::new(bytes),
        }
    }

    /// Reads the watermark from a local file once.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, WatermarkError> {
        Ok(Self::new(std::fs::read(path)?))
    }
}

#[async_trait]
impl WatermarkSource for StaticWatermarkSource {
    async fn fetch(&self) -> Result<Vec<u8>, WatermarkError> {
        Ok(self.bytes.as_ref().clone())
    }

    fn describe(&self) -> String {
        format!("static ({} bytes)", self.bytes.len())
    }
}

/// Returns the artifact path for a source image: `watermarked_<file name>.jpg` beside it.
///
/// The full source name is kept so `cat.png` and `cat.jpg` never share an artifact.
#[must_use]
pub fn output_path_for(source: &Path) -> PathBuf {
    let name = source
        .file_name()
        .map_or_else(|| "image".into(), |s| s.to_string_lossy());
    source.with_file_name(format!("watermarked_{name}.jpg"))
}

/// Watermarks the source image and hands the artifact to SHIP.
pub struct TransformExecutor {
    source: Arc<dyn WatermarkSource>,
    max_width_fraction: f32,
    margin_px: u32,
    jpeg_quality: u8,
}

impl fmt::Debug for TransformExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformExecutor")
            .field("source", &self.source.describe())
            .field("max_width_fraction", &self.max_width_fraction)
            .field("margin_px", &self.margin_px)
            .finish_non_exhaustive()
    }
}

impl TransformExecutor {
    /// Creates an executor with the default geometry (20%, 10 px margin).
    #[must_use]
    pub fn new(source: Arc<dyn WatermarkSource>) -> Self {
        Self {
            source,
            max_width_fraction: 0.2,
            margin_px: 10,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }

    /// Creates an executor from configuration.
    #[must_use]
    pub fn from_config(source: Arc<dyn WatermarkSource>, config: &TransformConfig) -> Self {
        Self::new(source)
            .with_max_width_fraction(config.max_width_fraction)
            .with_margin(config.margin_px)
            .with_jpeg_quality(config.jpeg_quality)
    }

    /// Sets the largest fraction of the base the watermark may cover per side.
    #[must_use]
    pub const fn with_max_width_fraction(mut self, fraction: f32) -> Self {
        self.max_width_fraction = fraction;
        self
    }

    /// Sets the margin from the top and right edges.
    #[must_use]
    pub const fn with_margin(mut self, margin_px: u32) -> Self {
        self.margin_px = margin_px;
        self
    }

    /// Sets the artifact JPEG quality.
    #[must_use]
    pub const fn with_jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality;
        self
    }

    fn render(
        &self,
        source: PathBuf,
        watermark: Vec<u8>,
    ) -> impl FnOnce() -> Result<(PathBuf, compose::Placement), ComposeError> {
        let fraction = self.max_width_fraction;
        let margin = self.margin_px;
        let quality = self.jpeg_quality;
        move || {
            let bytes = std::fs::read(&source)?;
            let (canvas, placement) =
                compose::composite_watermark(&bytes, &watermark, fraction, margin)?;
            let output = output_path_for(&source);
            compose::write_jpeg_atomic(&canvas, &output, quality)?;
            Ok((output, placement))
        }
    }
}

#[async_trait]
impl StageExecutor for TransformExecutor {
    fn stage(&self) -> Stage {
        Stage::Transform
    }

    async fn execute(&self, ctx: &dyn ExecutionContext, payload: &Payload) -> Outcome {
        let Payload::Transform(input) = payload else {
            return Outcome::permanent("unexpected_payload");
        };
        let job_id = ctx.job_id();
        let source = input.file_reference.clone();

        match tokio::fs::metadata(&source).await {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => return Outcome::permanent("file_not_found"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!(%job_id, path = %source.display(), "Source image not found");
                return Outcome::permanent("file_not_found");
            }
            Err(e) => {
                warn!(%job_id, path = %source.display(), error = %e, "Source image unreadable");
                return Outcome::transient("storage_unavailable");
            }
        }

        let watermark = match self.source.fetch().await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(
                    %job_id,
                    source = %self.source.describe(),
                    error = %e,
                    "Watermark download failed"
                );
                return match e.failure_kind() {
                    FailureKind::Transient => Outcome::transient("download_failed"),
                    FailureKind::Permanent => Outcome::permanent("download_failed"),
                };
            }
        };

        let rendered = tokio::task::spawn_blocking(self.render(source, watermark)).await;
        match rendered {
            Ok(Ok((output, placement))) => {
                info!(
                    %job_id,
                    output = %output.display(),
                    x = placement.x,
                    y = placement.y,
                    width = placement.width,
                    height = placement.height,
                    "Watermarked image saved"
                );
                Outcome::success_with(Payload::ship(output))
            }
            Ok(Err(
                e @ (ComposeError::InvalidSource(_) | ComposeError::InvalidWatermark(_)),
            )) => {
                warn!(%job_id, error = %e, "Image data rejected");
                Outcome::permanent("invalid_image_data")
            }
            Ok(Err(ComposeError::Io(e))) if e.kind() == io::ErrorKind::NotFound => {
                Outcome::permanent("file_not_found")
            }
            Ok(Err(e)) => {
                warn!(%job_id, error = %e, "Failed to write artifact");
                Outcome::transient("write_failed")
            }
            Err(e) => {
                warn!(%job_id, error = %e, "Compositing task aborted");
                Outcome::permanent("internal_error")
            }
        }
    }
}
