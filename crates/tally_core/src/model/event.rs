//! Logged event model.
//!
//! # Invariants
//! - `id` is stable and never reused for another event.
//! - Only the tag set may change after creation.
//! - `timestamp_ms` is non-negative.

use crate::model::tag::TagId;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

pub type EventId = Uuid;

const MAX_NOTE_CHARS: usize = 2_000;

/// One timestamped occurrence of the tracked habit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggedEvent {
    pub id: EventId,
    pub timestamp_ms: i64,
    pub note: String,
    /// Referenced tags, sorted and unique.
    pub tag_ids: Vec<TagId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventValidationError {
    NegativeTimestamp(i64),
    NoteTooLong { chars: usize, max: usize },
}

impl Display for EventValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NegativeTimestamp(value) => write!(f, "event timestamp is negative: {value}"),
            Self::NoteTooLong { chars, max } => {
                write!(f, "event note has {chars} chars; max is {max}")
            }
        }
    }
}

impl Error for EventValidationError {}

impl LoggedEvent {
    /// Creates an untagged event with a fresh id.
    pub fn new(timestamp_ms: i64, note: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4(), timestamp_ms, note)
    }

    /// Creates an event with a caller-provided id (queue drain, migration).
    pub fn with_id(id: EventId, timestamp_ms: i64, note: impl Into<String>) -> Self {
        Self {
            id,
            timestamp_ms,
            note: note.into(),
            tag_ids: Vec::new(),
        }
    }

    pub fn validate(&self) -> Result<(), EventValidationError> {
        if self.timestamp_ms < 0 {
            return Err(EventValidationError::NegativeTimestamp(self.timestamp_ms));
        }
        let chars = self.note.chars().count();
        if chars > MAX_NOTE_CHARS {
            return Err(EventValidationError::NoteTooLong {
                chars,
                max: MAX_NOTE_CHARS,
            });
        }
        Ok(())
    }
}
