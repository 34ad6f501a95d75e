//! # Mediaflow
//!
//! A crash-tolerant two-stage media job pipeline.
//!
//! Every uploaded image passes through two stages, each run as its own job
//! on a durable queue:
//!
//! - **Transform**: stamp a watermark into the top-right corner and write a JPEG
//! - **Ship**: upload the artifact to a receiving service as multipart form data
//!
//! Jobs are leased with a visibility timeout. A worker that crashes mid-job
//! simply never acknowledges its lease, and the job is handed to the next
//! worker once the lease expires. Transient SHIP failures are retried on a
//! bounded linear schedule; everything else fails terminally with a reason.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use mediaflow::prelude::*;
//!
//! let queue = Arc::new(FileQueue::open("./queue")?);
//! let executors = ExecutorRegistry::new()
//!     .with_executor(Arc::new(TransformExecutor::new(watermark)))
//!     .with_executor(Arc::new(ShipExecutor::new(client, endpoint, "worker-1")));
//!
//! let scheduler = Scheduler::new(queue, executors);
//! let job_id = submit(&scheduler, Path::new("cat.png"), Path::new("./uploads"), None).await?;
//! scheduler.run(&CancellationToken::new()).await;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod executors;
pub mod ingress;
pub mod observability;
pub mod queue;
pub mod retry;
pub mod scheduler;
#[cfg(test)]
pub(crate) mod testing;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::{QueueBackend, WorkerConfig};
    pub use crate::core::{FailureKind, Job, JobId, Outcome, Payload, Stage};
    pub use crate::errors::{MediaflowError, QueueError, TerminalFailure};
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::executors::{
        ExecutionContext, ExecutorRegistry, HttpWatermarkSource, ShipExecutor, StageExecutor,
        StaticWatermarkSource, TransformExecutor, WatermarkSource,
    };
    pub use crate::ingress::submit;
    pub use crate::queue::{DurableQueue, FileQueue, InMemoryQueue, Lease};
    pub use crate::retry::{RetryDecision, RetryPolicy};
    pub use crate::scheduler::{Disposition, Scheduler, WorkerStats};
    pub use crate::utils::{generate_uuid, Clock, SystemClock, Timestamp};
    pub use std::sync::Arc;
}
