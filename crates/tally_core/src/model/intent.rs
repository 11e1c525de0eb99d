//! Pending write intents produced by processes that cannot open the store.
//!
//! # Invariants
//! - Intents are appended in creation order.
//! - `intent_id` doubles as the id of the event created from the intent,
//!   which makes replaying an already committed intent a no-op.

use crate::model::event::LoggedEvent;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingWriteIntent {
    /// Missing on entries written by older extension builds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent_id: Option<Uuid>,
    pub timestamp_ms: i64,
    #[serde(default)]
    pub note: String,
}

impl PendingWriteIntent {
    pub fn new(timestamp_ms: i64, note: impl Into<String>) -> Self {
        Self {
            intent_id: Some(Uuid::new_v4()),
            timestamp_ms,
            note: note.into(),
        }
    }

    /// Builds the event this intent stands for.
    pub fn to_event(&self) -> LoggedEvent {
        match self.intent_id {
            Some(id) => LoggedEvent::with_id(id, self.timestamp_ms, self.note.clone()),
            None => LoggedEvent::new(self.timestamp_ms, self.note.clone()),
        }
    }
}
