//! Local calendar-day arithmetic over epoch milliseconds.
//!
//! "Today", "yesterday" and the per-day side-channel keys all follow the
//! device's local time zone.

use chrono::{Days, Local, LocalResult, NaiveDate, TimeZone};

/// Local calendar date containing `ms`.
pub fn local_date(ms: i64) -> NaiveDate {
    match Local.timestamp_millis_opt(ms) {
        LocalResult::Single(at) => at.date_naive(),
        LocalResult::Ambiguous(earliest, _) => earliest.date_naive(),
        LocalResult::None => chrono::DateTime::from_timestamp_millis(ms)
            .map(|at| at.date_naive())
            .unwrap_or_default(),
    }
}

/// Epoch milliseconds of local midnight starting `date`.
pub fn day_start_ms(date: NaiveDate) -> i64 {
    let midnight = date.and_hms_opt(0, 0, 0).unwrap_or_default();
    match Local.from_local_datetime(&midnight) {
        LocalResult::Single(at) => at.timestamp_millis(),
        LocalResult::Ambiguous(earliest, _) => earliest.timestamp_millis(),
        // Midnight skipped by a DST jump; the day starts at the jump.
        LocalResult::None => Local
            .from_local_datetime(&(midnight + chrono::Duration::hours(1)))
            .earliest()
            .map(|at| at.timestamp_millis())
            .unwrap_or_else(|| midnight.and_utc().timestamp_millis()),
    }
}

/// Half-open `[start, end)` range covering `days` local days that end with
/// (and include) the day containing `now_ms`.
pub fn trailing_days_range(now_ms: i64, days: u32) -> (i64, i64) {
    let today = local_date(now_ms);
    let first = today
        .checked_sub_days(Days::new(u64::from(days.saturating_sub(1))))
        .unwrap_or(today);
    let tomorrow = today.checked_add_days(Days::new(1)).unwrap_or(today);
    (day_start_ms(first), day_start_ms(tomorrow))
}

/// Range of the single local day `offset_days` before the day of `now_ms`.
pub fn day_range(now_ms: i64, offset_days: u32) -> (i64, i64) {
    let today = local_date(now_ms);
    let day = today
        .checked_sub_days(Days::new(u64::from(offset_days)))
        .unwrap_or(today);
    let next = day.checked_add_days(Days::new(1)).unwrap_or(day);
    (day_start_ms(day), day_start_ms(next))
}
