//! Time and timestamp helpers.
//!
//! Every readiness and retry computation takes `now` as an argument instead of
//! reading the clock, so those rules stay deterministic under test.

use chrono::{DateTime, Duration, Utc};

/// UTC timestamp used for scheduling gates, lifecycle stamps and results.
pub type Timestamp = DateTime<Utc>;

/// Return the current UTC time.
#[must_use]
pub fn now() -> Timestamp {
    Utc::now()
}

/// `ts` shifted forward by `millis` milliseconds (saturating at the chrono range).
#[must_use]
pub fn after_millis(ts: Timestamp, millis: u64) -> Timestamp {
    let millis = i64::try_from(millis).unwrap_or(i64::MAX);
    ts.checked_add_signed(Duration::milliseconds(millis))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// `ts` moved back by `days` whole days, `None` past the chrono range.
#[must_use]
pub fn days_before(ts: Timestamp, days: u32) -> Option<Timestamp> {
    Duration::try_days(i64::from(days)).and_then(|span| ts.checked_sub_signed(span))
}

/// Whole milliseconds from `start` to `end`, clamped at zero.
#[must_use]
pub fn elapsed_millis(start: Timestamp, end: Timestamp) -> u64 {
    u64::try_from((end - start).num_milliseconds()).unwrap_or(0)
}

/// `true` when the optional gate is absent or has already passed.
#[must_use]
pub fn gate_open(gate: Option<Timestamp>, now: Timestamp) -> bool {
    gate.is_none_or(|at| at <= now)
}
