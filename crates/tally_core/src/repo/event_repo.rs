//! Event repository contract and SQLite implementation.
//!
//! # Responsibility
//! - Provide insert/read/delete and time-window queries over `events`.
//! - Own the `event_tags` link rows of each event.
//!
//! # Invariants
//! - Write paths call `LoggedEvent::validate()` before SQL mutations.
//! - Read paths reject invalid persisted state instead of masking it.
//! - Event lists are ordered by `timestamp_ms ASC, uuid ASC`.

use crate::model::event::{EventId, LoggedEvent};
use crate::model::tag::TagId;
use crate::repo::{parse_uuid, RepoError, RepoResult};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::BTreeSet;

const EVENT_SELECT_SQL: &str = "SELECT uuid, timestamp_ms, note FROM events";

/// Repository interface for event persistence.
pub trait EventRepository {
    /// Inserts one event and its tag links; fails on duplicate id.
    fn insert_event(&self, event: &LoggedEvent) -> RepoResult<EventId>;
    /// Inserts one event unless an event with the same id exists.
    /// Returns whether a row was written.
    fn insert_event_if_absent(&self, event: &LoggedEvent) -> RepoResult<bool>;
    fn get_event(&self, id: EventId) -> RepoResult<Option<LoggedEvent>>;
    fn delete_event(&self, id: EventId) -> RepoResult<()>;
    /// Replaces all tag links of one event.
    fn set_event_tags(&self, id: EventId, tag_ids: &[TagId]) -> RepoResult<()>;
    /// Events with `start_ms <= timestamp_ms < end_ms`.
    fn list_events_between(&self, start_ms: i64, end_ms: i64) -> RepoResult<Vec<LoggedEvent>>;
    fn count_events_between(&self, start_ms: i64, end_ms: i64) -> RepoResult<u32>;
    fn latest_event_timestamp(&self) -> RepoResult<Option<i64>>;
    fn earliest_event_timestamp(&self) -> RepoResult<Option<i64>>;
    /// Content match used to de-duplicate intents that carry no id.
    fn event_exists_with(&self, timestamp_ms: i64, note: &str) -> RepoResult<bool>;
    fn count_events(&self) -> RepoResult<u64>;
}

/// SQLite-backed event repository.
pub struct SqliteEventRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteEventRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    fn insert_tag_links(&self, event: &LoggedEvent) -> RepoResult<()> {
        let event_id = event.id.to_string();
        for tag_id in unique_tags(&event.tag_ids) {
            self.conn.execute(
                "INSERT OR IGNORE INTO event_tags (event_uuid, tag_uuid) VALUES (?1, ?2);",
                params![event_id.as_str(), tag_id.to_string()],
            )?;
        }
        Ok(())
    }

    fn load_tag_ids(&self, event_uuid: &str) -> RepoResult<Vec<TagId>> {
        let mut stmt = self.conn.prepare(
            "SELECT tag_uuid FROM event_tags WHERE event_uuid = ?1 ORDER BY tag_uuid ASC;",
        )?;
        let mut rows = stmt.query([event_uuid])?;
        let mut tag_ids = Vec::new();
        while let Some(row) = rows.next()? {
            let value: String = row.get(0)?;
            tag_ids.push(parse_uuid(&value, "event_tags.tag_uuid")?);
        }
        Ok(tag_ids)
    }

    fn parse_event_row(&self, row: &Row<'_>) -> RepoResult<LoggedEvent> {
        let uuid_text: String = row.get("uuid")?;
        let id = parse_uuid(&uuid_text, "events.uuid")?;
        let event = LoggedEvent {
            id,
            timestamp_ms: row.get("timestamp_ms")?,
            note: row.get("note")?,
            tag_ids: self.load_tag_ids(&uuid_text)?,
        };
        event
            .validate()
            .map_err(|err| RepoError::InvalidData(format!("events row {uuid_text}: {err}")))?;
        Ok(event)
    }
}

impl EventRepository for SqliteEventRepository<'_> {
    fn insert_event(&self, event: &LoggedEvent) -> RepoResult<EventId> {
        event.validate()?;

        self.conn.execute(
            "INSERT INTO events (uuid, timestamp_ms, note) VALUES (?1, ?2, ?3);",
            params![event.id.to_string(), event.timestamp_ms, event.note.as_str()],
        )?;
        self.insert_tag_links(event)?;

        Ok(event.id)
    }

    fn insert_event_if_absent(&self, event: &LoggedEvent) -> RepoResult<bool> {
        event.validate()?;

        let changed = self.conn.execute(
            "INSERT OR IGNORE INTO events (uuid, timestamp_ms, note) VALUES (?1, ?2, ?3);",
            params![event.id.to_string(), event.timestamp_ms, event.note.as_str()],
        )?;
        if changed == 0 {
            return Ok(false);
        }
        self.insert_tag_links(event)?;
        Ok(true)
    }

    fn get_event(&self, id: EventId) -> RepoResult<Option<LoggedEvent>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{EVENT_SELECT_SQL} WHERE uuid = ?1;"))?;
        let mut rows = stmt.query([id.to_string()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(self.parse_event_row(row)?));
        }
        Ok(None)
    }

    fn delete_event(&self, id: EventId) -> RepoResult<()> {
        let changed = self
            .conn
            .execute("DELETE FROM events WHERE uuid = ?1;", [id.to_string()])?;
        if changed == 0 {
            return Err(RepoError::NotFound(id));
        }
        Ok(())
    }

    fn set_event_tags(&self, id: EventId, tag_ids: &[TagId]) -> RepoResult<()> {
        let event_id = id.to_string();
        let exists: i64 = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM events WHERE uuid = ?1);",
            [event_id.as_str()],
            |row| row.get(0),
        )?;
        if exists == 0 {
            return Err(RepoError::NotFound(id));
        }

        self.conn.execute(
            "DELETE FROM event_tags WHERE event_uuid = ?1;",
            [event_id.as_str()],
        )?;
        for tag_id in unique_tags(tag_ids) {
            let changed = self.conn.execute(
                "INSERT INTO event_tags (event_uuid, tag_uuid)
                 SELECT ?1, uuid FROM tags WHERE uuid = ?2;",
                params![event_id.as_str(), tag_id.to_string()],
            )?;
            if changed == 0 {
                return Err(RepoError::NotFound(tag_id));
            }
        }
        Ok(())
    }

    fn list_events_between(&self, start_ms: i64, end_ms: i64) -> RepoResult<Vec<LoggedEvent>> {
        let mut stmt = self.conn.prepare(&format!(
            "{EVENT_SELECT_SQL}
             WHERE timestamp_ms >= ?1 AND timestamp_ms < ?2
             ORDER BY timestamp_ms ASC, uuid ASC;"
        ))?;
        let mut rows = stmt.query(params![start_ms, end_ms])?;
        let mut events = Vec::new();
        while let Some(row) = rows.next()? {
            events.push(self.parse_event_row(row)?);
        }
        Ok(events)
    }

    fn count_events_between(&self, start_ms: i64, end_ms: i64) -> RepoResult<u32> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM events WHERE timestamp_ms >= ?1 AND timestamp_ms < ?2;",
            params![start_ms, end_ms],
            |row| row.get(0),
        )?;
        u32::try_from(count)
            .map_err(|_| RepoError::InvalidData(format!("event count overflow: {count}")))
    }

    fn latest_event_timestamp(&self) -> RepoResult<Option<i64>> {
        let value = self
            .conn
            .query_row("SELECT MAX(timestamp_ms) FROM events;", [], |row| {
                row.get::<_, Option<i64>>(0)
            })?;
        Ok(value)
    }

    fn earliest_event_timestamp(&self) -> RepoResult<Option<i64>> {
        let value = self
            .conn
            .query_row("SELECT MIN(timestamp_ms) FROM events;", [], |row| {
                row.get::<_, Option<i64>>(0)
            })?;
        Ok(value)
    }

    fn event_exists_with(&self, timestamp_ms: i64, note: &str) -> RepoResult<bool> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM events WHERE timestamp_ms = ?1 AND note = ?2 LIMIT 1;",
                params![timestamp_ms, note],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn count_events(&self) -> RepoResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM events;", [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }
}

fn unique_tags(tag_ids: &[TagId]) -> BTreeSet<TagId> {
    tag_ids.iter().copied().collect()
}
