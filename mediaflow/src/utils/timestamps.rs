//! Timestamp helpers shared by job records and queues.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Represents a timestamp that can be serialized/deserialized.
pub type Timestamp = DateTime<Utc>;

/// Adds a std duration to a timestamp, saturating at the latest representable instant.
///
/// # Examples
///
/// ```
/// use chrono::Utc;
/// use mediaflow::utils::add_duration;
/// use std::time::Duration;
///
/// let now = Utc::now();
/// assert_eq!((add_duration(now, Duration::from_secs(5)) - now).num_seconds(), 5);
/// ```
#[must_use]
pub fn add_duration(ts: Timestamp, delay: Duration) -> Timestamp {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|d| ts.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Returns how long until `target`, or zero if it has passed.
#[must_use]
pub fn duration_until(now: Timestamp, target: Timestamp) -> Duration {
    (target - now).to_std().unwrap_or(Duration::ZERO)
}
