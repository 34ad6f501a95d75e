//! Core domain model types for mediaflow.
//!
//! This module contains the fundamental types used throughout the pipeline:
//! - The stage enum
//! - Job records and their payloads
//! - The outcome type returned by executors

mod job;
mod output;
mod status;

pub use job::{Job, JobId, Payload, ShipPayload, TransformPayload};
pub use output::{FailureKind, Outcome};
pub use status::Stage;
