//! Side-channel snapshot and derived statistics.

use crate::model::event::{EventId, LoggedEvent};
use serde::{Deserialize, Serialize};

/// Glanceable summary published to the extension and the wearable.
///
/// # Invariants
/// - `watermark_ms` is non-decreasing across all writers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncSnapshot {
    pub today_count: u32,
    pub daily_average: f64,
    pub last_event_at_ms: Option<i64>,
    pub watermark_ms: i64,
}

/// Compact event shape used in per-day lists and wearable payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSummary {
    pub id: EventId,
    pub timestamp: i64,
    #[serde(default)]
    pub note: String,
}

impl From<&LoggedEvent> for EventSummary {
    fn from(event: &LoggedEvent) -> Self {
        Self {
            id: event.id,
            timestamp: event.timestamp_ms,
            note: event.note.clone(),
        }
    }
}

/// Counts answered to the wearable `getStats` request.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PeriodStats {
    pub today_count: u32,
    pub yesterday_count: u32,
    pub week_count: u32,
    pub weekly_average: f64,
}
