//! Logging initialization and timing helpers.
//!
//! The library only emits `tracing` events; installing a subscriber is the
//! binary's job, done once through [`init_logging`].

use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Output format for log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// One JSON object per line
    Json,
    /// Multi-line, human readable
    Pretty,
    /// Single-line, human readable
    #[default]
    Compact,
}

/// Options for [`init_logging`].
#[derive(Debug, Clone, Default)]
pub struct LoggingOptions {
    /// Line format.
    pub format: LogFormat,
    /// Extra verbosity (`-v` count): 0 = info, 1 = debug, 2+ = trace.
    pub verbose: u8,
    /// Only warnings and errors.
    pub quiet: bool,
}

impl LoggingOptions {
    /// Returns the filter directive used when `RUST_LOG` is unset.
    #[must_use]
    pub const fn default_directive(&self) -> &'static str {
        if self.quiet {
            return "warn";
        }
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

/// Installs the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over the verbosity flags unless `quiet` is set.
pub fn init_logging(
    options: &LoggingOptions,
) -> Result<(), tracing_subscriber::util::TryInitError> {
    let filter = if options.quiet {
        EnvFilter::new(options.default_directive())
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(options.default_directive()))
    };

    let fmt_layer = match options.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        LogFormat::Pretty => fmt::layer().pretty().boxed(),
        LogFormat::Compact => fmt::layer().compact().boxed(),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
}

/// Wall-clock timer for one dispatch.
#[derive(Debug)]
pub struct SpanTimer {
    start: Instant,
}

impl SpanTimer {
    /// Starts timing.
    #[must_use]
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Returns the elapsed time in milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.start.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directive() {
        let mut options = LoggingOptions::default();
        assert_eq!(options.default_directive(), "info");

        options.verbose = 1;
        assert_eq!(options.default_directive(), "debug");

        options.verbose = 3;
        assert_eq!(options.default_directive(), "trace");

        options.quiet = true;
        assert_eq!(options.default_directive(), "warn");
    }

    #[test]
    fn test_log_format_serde() {
        let format: LogFormat = serde_json::from_str("\"json\"").unwrap();
        assert_eq!(format, LogFormat::Json);
        assert_eq!(LogFormat::default(), LogFormat::Compact);
    }

    #[test]
    fn test_span_timer() {
        let timer = SpanTimer::start();
        std::thread::sleep(std::time::Duration::from_millis(10));
        assert!(timer.elapsed_ms() >= 10);
    }
}
