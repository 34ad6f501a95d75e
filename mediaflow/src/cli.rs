//! CLI argument definitions using clap.

use clap::{Parser, Subcommand};
use mediaflow::observability::{LogFormat, LoggingOptions};
use std::path::PathBuf;

/// Mediaflow - watermark uploaded images and ship them to a receiver
#[derive(Parser, Debug)]
#[command(
    name = "mediaflow",
    author,
    version,
    about = "Crash-tolerant two-stage media job pipeline",
    long_about = "Runs the watermark (TRANSFORM) and upload (SHIP) stages as durable,\n\
                  leased jobs. Any number of workers may share one queue directory."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "MEDIAFLOW_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value = "compact",
        global = true,
        env = "MEDIAFLOW_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    /// Path to a JSON configuration file
    #[arg(short, long, global = true, env = "MEDIAFLOW_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Logging options derived from the global flags.
    pub fn logging(&self) -> LoggingOptions {
        LoggingOptions {
            format: self.log_format,
            verbose: self.verbose,
            quiet: self.quiet,
        }
    }
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a worker until Ctrl-C
    Worker(WorkerArgs),

    /// Persist an image and enqueue its TRANSFORM job
    Submit(SubmitArgs),

    /// Print ready and leased record counts
    Status(StatusArgs),
}

/// Arguments for the `worker` command
#[derive(Parser, Debug, Clone)]
pub struct WorkerArgs {
    /// Override the worker name reported to the receiver
    #[arg(long)]
    pub name: Option<String>,

    /// Exit once no job is eligible instead of waiting for more
    #[arg(long)]
    pub drain: bool,
}

/// Arguments for the `submit` command
#[derive(Parser, Debug)]
pub struct SubmitArgs {
    /// Image to process
    pub file: PathBuf,

    /// Identity of whoever uploaded the image
    #[arg(long)]
    pub submitter: Option<String>,
}

/// Arguments for the `status` command
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}
