//! Testing utilities for mediaflow workers.
//!
//! Compiled for unit tests only.
//!
//! This module provides:
//! - A manually advanced clock for deterministic lease and backoff tests
//! - Scripted executors that replay canned outcomes
//! - An axum upload receiver for ship and watermark tests
//! - Image fixtures

mod clock;
mod fixtures;
mod mocks;
mod receiver;

pub use clock::ManualClock;
pub use fixtures::{png_bytes, write_png};
pub use mocks::{ExecutorCall, ScriptedExecutor};
pub use receiver::{unused_local_url, ReceivedPart, ReceivedRequest, TestReceiver};
