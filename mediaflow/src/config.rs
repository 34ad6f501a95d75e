//! Worker configuration.
//!
//! Every field has a default, so an empty JSON object is a valid config.
//! Values are resolved in order: defaults, then the optional JSON file, then
//! `MEDIAFLOW_*` environment variables.

use crate::errors::MediaflowError;
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Default watermark image.
pub const DEFAULT_WATERMARK_URL: &str =
    "https://www.google.com/images/branding/googlelogo/2x/googlelogo_color_92x30dp.png";

/// Default receiving service endpoint.
pub const DEFAULT_SHIP_ENDPOINT: &str = "http://localhost:8003/upload-final";

/// Which queue implementation a worker uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueBackend {
    /// Directory shared by worker processes.
    #[default]
    File,
    /// In-process only; work is lost on exit.
    Memory,
}

impl FromStr for QueueBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "file" => Ok(Self::File),
            "memory" => Ok(Self::Memory),
            other => Err(format!("unknown queue backend '{other}'")),
        }
    }
}

/// Queue and lease settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Backend to use.
    #[serde(default)]
    pub backend: QueueBackend,
    /// Root directory of the file queue.
    #[serde(default = "default_queue_path")]
    pub path: PathBuf,
    /// How long a lease lasts without acknowledgment.
    #[serde(default = "default_visibility_timeout")]
    pub visibility_timeout_seconds: u64,
    /// Longest idle wait between lease attempts.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Terminal failure after this many crash redeliveries of one attempt.
    #[serde(default)]
    pub max_crash_redeliveries: Option<u32>,
    /// Extend the lease at this interval while a job runs.
    #[serde(default)]
    pub heartbeat_interval_seconds: Option<u64>,
}

fn default_queue_path() -> PathBuf {
    PathBuf::from("./queue")
}

const fn default_visibility_timeout() -> u64 {
    300
}

const fn default_poll_interval() -> u64 {
    1000
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: QueueBackend::default(),
            path: default_queue_path(),
            visibility_timeout_seconds: default_visibility_timeout(),
            poll_interval_ms: default_poll_interval(),
            max_crash_redeliveries: None,
            heartbeat_interval_seconds: None,
        }
    }
}

impl QueueConfig {
    /// Gets the visibility timeout as a Duration.
    #[must_use]
    pub const fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_seconds)
    }

    /// Gets the poll interval as a Duration.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Gets the heartbeat interval, if enabled.
    #[must_use]
    pub fn heartbeat_interval(&self) -> Option<Duration> {
        self.heartbeat_interval_seconds.map(Duration::from_secs)
    }
}

/// TRANSFORM stage settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformConfig {
    /// Where the watermark is downloaded from.
    #[serde(default = "default_watermark_url")]
    pub watermark_url: String,
    /// Watermark download timeout.
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_seconds: u64,
    /// Largest share of the base width and height the watermark may cover.
    #[serde(default = "default_max_width_fraction")]
    pub max_width_fraction: f32,
    /// Distance from the top and right edges.
    #[serde(default = "default_margin")]
    pub margin_px: u32,
    /// User agent sent with the download.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Artifact JPEG quality (1-100).
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

fn default_watermark_url() -> String {
    DEFAULT_WATERMARK_URL.to_string()
}

const fn default_fetch_timeout() -> u64 {
    10
}

const fn default_max_width_fraction() -> f32 {
    0.2
}

const fn default_margin() -> u32 {
    10
}

fn default_user_agent() -> String {
    "Mozilla/5.0".to_string()
}

const fn default_jpeg_quality() -> u8 {
    crate::executors::DEFAULT_JPEG_QUALITY
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            watermark_url: default_watermark_url(),
            fetch_timeout_seconds: default_fetch_timeout(),
            max_width_fraction: default_max_width_fraction(),
            margin_px: default_margin(),
            user_agent: default_user_agent(),
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

/// SHIP stage settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipConfig {
    /// Receiving service URL.
    #[serde(default = "default_ship_endpoint")]
    pub endpoint: String,
    /// Upload timeout.
    #[serde(default = "default_ship_timeout")]
    pub timeout_seconds: u64,
}

fn default_ship_endpoint() -> String {
    DEFAULT_SHIP_ENDPOINT.to_string()
}

const fn default_ship_timeout() -> u64 {
    15
}

impl Default for ShipConfig {
    fn default() -> Self {
        Self {
            endpoint: default_ship_endpoint(),
            timeout_seconds: default_ship_timeout(),
        }
    }
}

/// Complete worker configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Name reported to the receiving service.
    #[serde(default = "default_worker_name")]
    pub worker_name: String,
    /// Directory submitted files are copied into.
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,
    /// Queue settings.
    #[serde(default)]
    pub queue: QueueConfig,
    /// Retry policy.
    #[serde(default)]
    pub retry: RetryPolicy,
    /// TRANSFORM settings.
    #[serde(default)]
    pub transform: TransformConfig,
    /// SHIP settings.
    #[serde(default)]
    pub ship: ShipConfig,
}

fn default_worker_name() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "local-worker".to_string())
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("./uploads")
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_name: default_worker_name(),
            upload_dir: default_upload_dir(),
            queue: QueueConfig::default(),
            retry: RetryPolicy::default(),
            transform: TransformConfig::default(),
            ship: ShipConfig::default(),
        }
    }
}

fn parse_env<T: FromStr>(key: &str, value: &str) -> Result<T, MediaflowError>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| MediaflowError::config(format!("{key}={value:?}: {e}")))
}

fn check_url(field: &str, value: &str) -> Result<(), MediaflowError> {
    let url = reqwest::Url::parse(value)
        .map_err(|e| MediaflowError::config(format!("{field} is not a URL: {e}")))?;
    if matches!(url.scheme(), "http" | "https") {
        Ok(())
    } else {
        Err(MediaflowError::config(format!(
            "{field} must use http or https, got '{}'",
            url.scheme()
        )))
    }
}

impl WorkerConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the worker name.
    #[must_use]
    pub fn with_worker_name(mut self, name: impl Into<String>) -> Self {
        self.worker_name = name.into();
        self
    }

    /// Sets the queue backend and directory.
    #[must_use]
    pub fn with_queue(mut self, backend: QueueBackend, path: impl Into<PathBuf>) -> Self {
        self.queue.backend = backend;
        self.queue.path = path.into();
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the receiving service endpoint.
    #[must_use]
    pub fn with_ship_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.ship.endpoint = endpoint.into();
        self
    }

    /// Reads a JSON config file.
    pub fn from_file(path: &Path) -> Result<Self, MediaflowError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            MediaflowError::config(format!("cannot read {}: {e}", path.display()))
        })?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Resolves defaults, the optional file, and process environment, then validates.
    pub fn load(path: Option<&Path>) -> Result<Self, MediaflowError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Applies `MEDIAFLOW_*` overrides read through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), MediaflowError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("MEDIAFLOW_WORKER_NAME") {
            self.worker_name = v;
        }
        if let Some(v) = get("MEDIAFLOW_UPLOAD_DIR") {
            self.upload_dir = PathBuf::from(v);
        }
        if let Some(v) = get("MEDIAFLOW_QUEUE_BACKEND") {
            self.queue.backend = parse_env("MEDIAFLOW_QUEUE_BACKEND", &v)?;
        }
        if let Some(v) = get("MEDIAFLOW_QUEUE_PATH") {
            self.queue.path = PathBuf::from(v);
        }
        if let Some(v) = get("MEDIAFLOW_VISIBILITY_TIMEOUT_SECONDS") {
            self.queue.visibility_timeout_seconds =
                parse_env("MEDIAFLOW_VISIBILITY_TIMEOUT_SECONDS", &v)?;
        }
        if let Some(v) = get("MEDIAFLOW_POLL_INTERVAL_MS") {
            self.queue.poll_interval_ms = parse_env("MEDIAFLOW_POLL_INTERVAL_MS", &v)?;
        }
        if let Some(v) = get("MEDIAFLOW_MAX_CRASH_REDELIVERIES") {
            self.queue.max_crash_redeliveries =
                Some(parse_env("MEDIAFLOW_MAX_CRASH_REDELIVERIES", &v)?);
        }
        if let Some(v) = get("MEDIAFLOW_HEARTBEAT_SECONDS") {
            let seconds = parse_env("MEDIAFLOW_HEARTBEAT_SECONDS", &v)?;
            self.queue.heartbeat_interval_seconds = Some(seconds);
        }
        if let Some(v) = get("MEDIAFLOW_RETRY_MAX_ATTEMPTS") {
            self.retry.max_attempts = parse_env("MEDIAFLOW_RETRY_MAX_ATTEMPTS", &v)?;
        }
        if let Some(v) = get("MEDIAFLOW_RETRY_BASE_DELAY_MS") {
            self.retry.base_delay_ms = parse_env("MEDIAFLOW_RETRY_BASE_DELAY_MS", &v)?;
        }
        if let Some(v) = get("MEDIAFLOW_WATERMARK_URL") {
            self.transform.watermark_url = v;
        }
        if let Some(v) = get("MEDIAFLOW_SHIP_ENDPOINT") {
            self.ship.endpoint = v;
        }
        if let Some(v) = get("MEDIAFLOW_SHIP_TIMEOUT_SECONDS") {
            self.ship.timeout_seconds = parse_env("MEDIAFLOW_SHIP_TIMEOUT_SECONDS", &v)?;
        }
        Ok(())
    }

    /// Rejects settings the worker cannot run with.
    pub fn validate(&self) -> Result<(), MediaflowError> {
        if self.worker_name.trim().is_empty() {
            return Err(MediaflowError::config("worker_name must not be empty"));
        }
        if self.queue.visibility_timeout_seconds == 0 {
            return Err(MediaflowError::config(
                "queue.visibility_timeout_seconds must be positive",
            ));
        }
        if self.queue.poll_interval_ms == 0 {
            return Err(MediaflowError::config("queue.poll_interval_ms must be positive"));
        }
        if let Some(heartbeat) = self.queue.heartbeat_interval_seconds {
            if heartbeat == 0 || heartbeat >= self.queue.visibility_timeout_seconds {
                return Err(MediaflowError::config(
                    "queue.heartbeat_interval_seconds must be positive and \
                     below the visibility timeout",
                ));
            }
        }
        if self.retry.max_attempts == 0 {
            return Err(MediaflowError::config("retry.max_attempts must be positive"));
        }
        let fraction = self.transform.max_width_fraction;
        if !(fraction > 0.0 && fraction <= 1.0) {
            return Err(MediaflowError::config(format!(
                "transform.max_width_fraction must be in (0, 1], got {fraction}"
            )));
        }
        if !(1..=100).contains(&self.transform.jpeg_quality) {
            return Err(MediaflowError::config("transform.jpeg_quality must be 1-100"));
        }
        if self.transform.fetch_timeout_seconds == 0 || self.ship.timeout_seconds == 0 {
            return Err(MediaflowError::config("HTTP timeouts must be positive"));
        }
        check_url("transform.watermark_url", &self.transform.watermark_url)?;
        check_url("ship.endpoint", &self.ship.endpoint)?;
        Ok(())
    }
}
