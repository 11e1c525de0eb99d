//! Well-known side-channel keys.
//!
//! Every process of the family reads and writes these names; renaming one
//! is a cross-process protocol change.

pub const TODAY_COUNT: &str = "today_count";
pub const DAILY_AVERAGE: &str = "daily_average";
pub const LAST_EVENT_AT_MS: &str = "last_event_at_ms";
/// Watermark: when the snapshot was last written.
pub const LAST_UPDATED_MS: &str = "last_updated_ms";
pub const PENDING_EVENTS: &str = "pending_events";
pub const EVENTS_BY_DAY_PREFIX: &str = "events_by_day.";
pub const LEGACY_MIGRATION_DONE: &str = "legacy_migration_done";
pub const STORE_REPAIR_RESULT: &str = "store_repair.result";
pub const STORE_REPAIR_AT_MS: &str = "store_repair.at_ms";
pub const STORE_REPAIR_SALVAGED: &str = "store_repair.salvaged";
pub const EXTENSION_REFRESH_GENERATION: &str = "extension_refresh.generation";
pub const EXTENSION_REFRESH_KIND: &str = "extension_refresh.kind";

/// Key of the serialized event list for one calendar day (`YYYY-MM-DD`).
pub fn events_by_day(date: chrono::NaiveDate) -> String {
    format!("{EVENTS_BY_DAY_PREFIX}{}", date.format("%Y-%m-%d"))
}

#[cfg(test)]
mod tests {
    use super::events_by_day;
    use chrono::NaiveDate;

    #[test]
    fn day_key_uses_iso_date() {
        let date = NaiveDate::from_ymd_opt(2026, 6, 5).unwrap();
        assert_eq!(events_by_day(date), "events_by_day.2026-06-05");
    }
}
