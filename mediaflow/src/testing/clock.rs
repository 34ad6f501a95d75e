//! Manually advanced clock.

use crate::utils::{add_duration, Clock, Timestamp};
use chrono::DateTime;
use parking_lot::Mutex;
use std::time::Duration;

/// A [`Clock`] that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Timestamp>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(DateTime::from_timestamp(1_700_000_000, 0).unwrap_or_default())
    }
}

impl ManualClock {
    /// Creates a clock frozen at `start`.
    #[must_use]
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now = add_duration(*now, by);
    }

    /// Sets the clock to `at`.
    pub fn set(&self, at: Timestamp) {
        *self.now.lock() = at;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.now.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::default();
        let start = clock.now();
        clock.advance(Duration::from_secs(90));
        assert_eq!(clock.now() - start, chrono::Duration::seconds(90));

        clock.set(start);
        assert_eq!(clock.now(), start);
    }
}
