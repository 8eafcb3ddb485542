//! Time helpers.
//!
//! Message timestamps coming from the messaging client are Unix
//! milliseconds. Everything here works in that unit.

use chrono::{DateTime, Local, TimeZone, Utc};

/// Returns the current Unix timestamp in seconds.
pub fn now_timestamp() -> i64 {
    Utc::now().timestamp()
}

/// Returns the current Unix timestamp in milliseconds.
pub fn now_timestamp_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Label for a message timestamp in the local timezone.
///
/// Same calendar day as now gives `HH:MM`, anything else gives `YYYY-MM-DD`.
pub fn message_time_display(timestamp_ms: i64) -> String {
    format_message_time(timestamp_ms, Local::now())
}

/// Label for `timestamp_ms` relative to `now`, in `now`'s timezone.
pub fn format_message_time<Tz: TimeZone>(timestamp_ms: i64, now: DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    let Some(sent) = now.timezone().timestamp_millis_opt(timestamp_ms).single() else {
        return String::new();
    };

    if sent.date_naive() == now.date_naive() {
        sent.format("%H:%M").to_string()
    } else {
        sent.format("%Y-%m-%d").to_string()
    }
}
