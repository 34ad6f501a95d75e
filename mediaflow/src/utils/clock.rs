//! Time source abstraction.
//!
//! Queues and the scheduler read "now" through a [`Clock`] so that backoff
//! and lease expiry can be driven deterministically in tests.

use super::Timestamp;
use chrono::Utc;
use std::fmt::Debug;

/// A source of the current UTC time.
pub trait Clock: Send + Sync + Debug {
    /// Returns the current time.
    fn now(&self) -> Timestamp;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Utc::now()
    }
}
