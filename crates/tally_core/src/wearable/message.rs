//! Wire format of the wearable channel.
//!
//! Every message is one flat JSON object with a required `action` field.
//! Timestamps are epoch milliseconds.

use crate::model::event::EventId;
use crate::model::snapshot::{EventSummary, PeriodStats};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum WireMessage {
    /// Wearable asks the host to log one event.
    AddEvent {
        timestamp: i64,
        #[serde(default)]
        note: String,
    },
    /// Wearable asks for today's full event list.
    RequestSync,
    /// Wearable asks for period counts.
    GetStats,
    /// Host push: one event was logged.
    EventAdded {
        id: EventId,
        timestamp: i64,
        #[serde(default)]
        note: String,
    },
    /// Host push: today's events, sent wholesale.
    FullSync { cigarettes: Vec<EventSummary> },
}

impl WireMessage {
    pub fn action(&self) -> &'static str {
        match self {
            Self::AddEvent { .. } => "addEvent",
            Self::RequestSync => "requestSync",
            Self::GetStats => "getStats",
            Self::EventAdded { .. } => "eventAdded",
            Self::FullSync { .. } => "fullSync",
        }
    }

    pub fn from_json(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl From<&EventSummary> for WireMessage {
    fn from(event: &EventSummary) -> Self {
        Self::EventAdded {
            id: event.id,
            timestamp: event.timestamp,
            note: event.note.clone(),
        }
    }
}

/// Reply to one wearable request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireReply {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<EventId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cigarettes: Option<Vec<EventSummary>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub today_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub yesterday_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub week_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weekly_average: Option<f64>,
}

impl WireReply {
    pub fn added(id: EventId) -> Self {
        Self {
            success: true,
            id: Some(id),
            ..Self::default()
        }
    }

    pub fn events(cigarettes: Vec<EventSummary>) -> Self {
        Self {
            success: true,
            cigarettes: Some(cigarettes),
            ..Self::default()
        }
    }

    pub fn stats(stats: PeriodStats) -> Self {
        Self {
            success: true,
            today_count: Some(stats.today_count),
            yesterday_count: Some(stats.yesterday_count),
            week_count: Some(stats.week_count),
            weekly_average: Some(stats.weekly_average),
            ..Self::default()
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
            ..Self::default()
        }
    }

    /// Serialized reply; never fails.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|_| r#"{"success":false,"error":"reply encoding failed"}"#.to_string())
    }
}
