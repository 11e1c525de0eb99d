//! Snapshot and period statistics computed straight from the Shared Store.
//!
//! Counters cached by other processes are never trusted; every value here
//! is re-queried.

use crate::calendar;
use crate::model::event::LoggedEvent;
use crate::model::snapshot::{PeriodStats, SyncSnapshot};
use crate::repo::event_repo::{EventRepository, SqliteEventRepository};
use crate::repo::RepoResult;
use rusqlite::Connection;

const WEEK_DAYS: u32 = 7;

/// Recomputes the glanceable snapshot. `watermark_ms` is left at 0; the
/// side-channel assigns it on write.
pub fn compute_snapshot(
    conn: &Connection,
    now_ms: i64,
    average_window_days: u32,
) -> RepoResult<SyncSnapshot> {
    let repo = SqliteEventRepository::new(conn);
    let (today_start, today_end) = calendar::day_range(now_ms, 0);

    Ok(SyncSnapshot {
        today_count: repo.count_events_between(today_start, today_end)?,
        daily_average: rolling_daily_average(&repo, now_ms, average_window_days)?,
        last_event_at_ms: repo.latest_event_timestamp()?,
        watermark_ms: 0,
    })
}

/// Today / yesterday / trailing-week counts for the wearable.
pub fn compute_period_stats(conn: &Connection, now_ms: i64) -> RepoResult<PeriodStats> {
    let repo = SqliteEventRepository::new(conn);
    let (today_start, today_end) = calendar::day_range(now_ms, 0);
    let (yesterday_start, yesterday_end) = calendar::day_range(now_ms, 1);
    let (week_start, week_end) = calendar::trailing_days_range(now_ms, WEEK_DAYS);

    let week_count = repo.count_events_between(week_start, week_end)?;
    Ok(PeriodStats {
        today_count: repo.count_events_between(today_start, today_end)?,
        yesterday_count: repo.count_events_between(yesterday_start, yesterday_end)?,
        week_count,
        weekly_average: f64::from(week_count) / f64::from(WEEK_DAYS),
    })
}

pub fn today_events(conn: &Connection, now_ms: i64) -> RepoResult<Vec<LoggedEvent>> {
    let (start, end) = calendar::day_range(now_ms, 0);
    SqliteEventRepository::new(conn).list_events_between(start, end)
}

/// Events in the trailing window divided by the days of that window the
/// user has actually been tracking (first event day onwards).
fn rolling_daily_average(
    repo: &SqliteEventRepository<'_>,
    now_ms: i64,
    window_days: u32,
) -> RepoResult<f64> {
    let window_days = window_days.max(1);
    let Some(earliest) = repo.earliest_event_timestamp()? else {
        return Ok(0.0);
    };

    let (window_start, window_end) = calendar::trailing_days_range(now_ms, window_days);
    let count = repo.count_events_between(window_start, window_end)?;

    let today = calendar::local_date(now_ms);
    let first_day = calendar::local_date(earliest).max(calendar::local_date(window_start));
    let tracked_days = (today - first_day).num_days() + 1;
    let divisor = tracked_days.clamp(1, i64::from(window_days));

    Ok(f64::from(count) / divisor as f64)
}
