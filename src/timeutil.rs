//! Clock and time math.
//!
//! All times in the system are UTC. The store keeps Unix seconds; everything
//! above the store works with `DateTime<Utc>` and whole minutes. Deadline
//! arithmetic lives here so the state machine stays free of chrono plumbing.

use chrono::{DateTime, Duration, TimeZone, Utc};

/// Current UTC time.
pub fn now_utc() -> DateTime<Utc> {
    Utc::now()
}

/// Convert Unix seconds to a UTC timestamp.
///
/// Out-of-range values clamp to the epoch rather than panic; the store never
/// produces them.
pub fn from_unix_seconds(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_default()
}

/// Convert a UTC timestamp to Unix seconds.
pub fn to_unix_seconds(t: DateTime<Utc>) -> i64 {
    t.timestamp()
}

/// Add whole minutes.
pub fn add_minutes(t: DateTime<Utc>, minutes: i64) -> DateTime<Utc> {
    t + Duration::minutes(minutes)
}

/// Subtract whole minutes.
pub fn subtract_minutes(t: DateTime<Utc>, minutes: i64) -> DateTime<Utc> {
    t - Duration::minutes(minutes)
}

/// Whole minutes from `from` until `until`; negative once passed.
pub fn minutes_between(from: DateTime<Utc>, until: DateTime<Utc>) -> i64 {
    (until - from).num_minutes()
}

/// The moment a reviewer must have decided by: review start minus the
/// configured response deadline shift.
pub fn decision_deadline(review_start: DateTime<Utc>, shift_minutes: i64) -> DateTime<Utc> {
    subtract_minutes(review_start, shift_minutes)
}

/// The moment a non-whitelisted review gets auto-cancelled.
pub fn non_whitelist_cancel_at(now: DateTime<Utc>, delay_minutes: i64) -> DateTime<Utc> {
    add_minutes(now, delay_minutes)
}

/// Whether the review start is close enough to act on the slot.
///
/// The threshold is inclusive: a slot starting exactly `threshold_minutes`
/// from now is already actionable.
pub fn within_shift_threshold(
    review_start: DateTime<Utc>,
    now: DateTime<Utc>,
    threshold_minutes: i64,
) -> bool {
    minutes_between(now, review_start) <= threshold_minutes
}

/// Slot length in whole minutes, computed strictly as `end - start`.
pub fn slot_duration_minutes(start: DateTime<Utc>, end: DateTime<Utc>) -> i64 {
    minutes_between(start, end)
}

/// Short human format used in chat messages: `Jan 8 14:30 UTC`.
pub fn format_short(t: DateTime<Utc>) -> String {
    t.format("%b %-d %H:%M UTC").to_string()
}

/// Full format for logs and detailed messages: `2025-01-08 14:30:00 UTC`.
pub fn format_for_message(t: DateTime<Utc>) -> String {
    t.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}
