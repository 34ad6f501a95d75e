//! Utility functions for ids, timestamps and time sources.

mod clock;
pub mod timestamps;

pub use clock::{Clock, SystemClock};
pub use timestamps::{add_duration, duration_until, Timestamp};

use uuid::Uuid;

/// Generates a new UUID v4.
#[must_use]
pub fn generate_uuid() -> Uuid {
    Uuid::new_v4()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_uuid_is_valid() {
        let id = generate_uuid();
        assert_eq!(id.get_version_num(), 4);
    }

    #[test]
    fn test_generate_uuid_is_unique() {
        assert_ne!(generate_uuid(), generate_uuid());
    }
}
