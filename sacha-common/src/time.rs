//! Timestamp utilities

use chrono::{DateTime, Utc};
use tokio::time::Instant;

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Whole milliseconds from `start` to `end`, saturating at zero when `end` precedes `start`
pub fn millis_between(start: Instant, end: Instant) -> u64 {
    let millis = end.saturating_duration_since(start).as_millis();
    u64::try_from(millis).unwrap_or(u64::MAX)
}

/// Whole milliseconds elapsed since `start`
pub fn elapsed_millis(start: Instant) -> u64 {
    millis_between(start, Instant::now())
}
