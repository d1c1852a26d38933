//! Saturating conversions between configured seconds and chrono durations.
//!
//! Configuration carries plain `u64`/`f64` seconds; chrono panics on
//! out-of-range durations, so every conversion goes through these helpers.

use chrono::{DateTime, Duration, Utc};

/// Largest whole-second duration chrono can represent
const MAX_SECONDS: i64 = i64::MAX / 1000;

pub(crate) fn seconds(secs: u64) -> Duration {
    let secs = i64::try_from(secs).unwrap_or(MAX_SECONDS).min(MAX_SECONDS);
    Duration::seconds(secs)
}

pub(crate) fn seconds_f64(secs: f64) -> Duration {
    if !(secs > 0.0) {
        return Duration::zero();
    }
    let millis = (secs * 1000.0).round().min(i64::MAX as f64);
    Duration::milliseconds(millis as i64)
}

pub(crate) fn as_secs_f64(duration: Duration) -> f64 {
    duration.num_milliseconds() as f64 / 1000.0
}

pub(crate) fn add(at: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    at.checked_add_signed(duration).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

pub(crate) fn sub(at: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    at.checked_sub_signed(duration).unwrap_or(DateTime::<Utc>::MIN_UTC)
}
