//! Wall-clock helpers. All persisted timestamps are integer seconds since
//! the Unix epoch; token timestamps use milliseconds.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current Unix time in seconds.
#[must_use]
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Current Unix time in milliseconds.
#[must_use]
pub fn unix_now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
