//! Timestamp utilities

use chrono::{DateTime, SecondsFormat, Utc};

/// Wall-clock time for record and event timestamps
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Configured millisecond delays as a `Duration`
pub fn millis_to_duration(millis: u64) -> std::time::Duration {
    std::time::Duration::from_millis(millis)
}

/// Format a timestamp as ISO-8601 with millisecond precision (`2025-01-01T00:00:00.000Z`)
pub fn to_iso8601(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}
