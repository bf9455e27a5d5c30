//! Deterministic test values
//!
//! Provides fixed timestamps so recorded files are reproducible.

use chrono::{DateTime, Utc};

/// Fixed timestamp for testing (2024-01-01 00:00:00 UTC)
pub const TEST_TIMESTAMP: &str = "2024-01-01T00:00:00Z";

/// Get a fixed chrono DateTime for testing
pub fn test_now() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(TEST_TIMESTAMP)
        .expect("Invalid test timestamp")
        .with_timezone(&Utc)
}

/// The fixed timestamp as the codec writes it (millisecond precision)
pub fn test_timestamp_encoded() -> String {
    "2024-01-01T00:00:00.000Z".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    #[test]
    fn test_timestamp() {
        let ts = test_now();
        assert_eq!(ts.year(), 2024);
        assert_eq!(ts.month(), 1);
        assert_eq!(ts.day(), 1);
    }
}
