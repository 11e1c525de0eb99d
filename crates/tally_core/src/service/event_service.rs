//! Host-side event and tag use-cases.
//!
//! # Responsibility
//! - Create, delete and re-tag events on behalf of the host UI and of the
//!   wearable `addEvent` request.
//! - Create, rename, recolor and delete tags (host only).
//! - Record urge logs.
//!
//! # Invariants
//! - Multi-statement writes run in one transaction.
//! - An event's timestamp and note never change after creation.

use crate::calendar;
use crate::model::catalog::UrgeLog;
use crate::model::event::{EventId, LoggedEvent};
use crate::model::tag::{normalize_tag_color, normalize_tag_name, Tag, TagId, DEFAULT_TAG_COLOR};
use crate::repo::catalog_repo::{CatalogRepository, SqliteCatalogRepository};
use crate::repo::event_repo::{EventRepository, SqliteEventRepository};
use crate::repo::tag_repo::{SqliteTagRepository, TagRepository};
use crate::repo::{RepoError, RepoResult};
use rusqlite::Connection;
use uuid::Uuid;

/// Use-case service over one open Shared Store connection.
pub struct EventService<'conn> {
    conn: &'conn Connection,
}

impl<'conn> EventService<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    /// Logs one event, optionally tagged.
    pub fn add_event(
        &self,
        timestamp_ms: i64,
        note: impl Into<String>,
        tag_ids: &[TagId],
    ) -> RepoResult<LoggedEvent> {
        let mut event = LoggedEvent::new(timestamp_ms, note.into().trim().to_string());
        event.tag_ids = tag_ids.to_vec();
        event.tag_ids.sort();
        event.tag_ids.dedup();

        let tx = self.conn.unchecked_transaction()?;
        {
            let tags = SqliteTagRepository::new(&tx);
            for tag_id in &event.tag_ids {
                if tags.get_tag(*tag_id)?.is_none() {
                    return Err(RepoError::NotFound(*tag_id));
                }
            }
            SqliteEventRepository::new(&tx).insert_event(&event)?;
        }
        tx.commit()?;
        Ok(event)
    }

    pub fn get_event(&self, id: EventId) -> RepoResult<Option<LoggedEvent>> {
        SqliteEventRepository::new(self.conn).get_event(id)
    }

    pub fn delete_event(&self, id: EventId) -> RepoResult<()> {
        SqliteEventRepository::new(self.conn).delete_event(id)
    }

    /// Replaces the full tag set of one event.
    pub fn set_event_tags(&self, id: EventId, tag_ids: &[TagId]) -> RepoResult<LoggedEvent> {
        let tx = self.conn.unchecked_transaction()?;
        SqliteEventRepository::new(&tx).set_event_tags(id, tag_ids)?;
        tx.commit()?;
        self.get_event(id)?.ok_or(RepoError::NotFound(id))
    }

    /// Events of the local day `offset_days` before the day of `now_ms`.
    pub fn events_on_day(&self, now_ms: i64, offset_days: u32) -> RepoResult<Vec<LoggedEvent>> {
        let (start, end) = calendar::day_range(now_ms, offset_days);
        SqliteEventRepository::new(self.conn).list_events_between(start, end)
    }

    pub fn create_tag(&self, name: &str, color: Option<&str>) -> RepoResult<Tag> {
        let name = normalize_tag_name(name)
            .ok_or_else(|| RepoError::InvalidInput("tag name cannot be blank".to_string()))?;
        let color = match color {
            Some(value) => normalize_tag_color(value)
                .ok_or_else(|| RepoError::InvalidInput(format!("invalid tag color `{value}`")))?,
            None => DEFAULT_TAG_COLOR.to_string(),
        };
        let tag = Tag::new(name, color);
        SqliteTagRepository::new(self.conn).insert_tag(&tag)?;
        Ok(tag)
    }

    pub fn rename_tag(&self, id: TagId, name: &str) -> RepoResult<Tag> {
        let name = normalize_tag_name(name)
            .ok_or_else(|| RepoError::InvalidInput("tag name cannot be blank".to_string()))?;
        let repo = SqliteTagRepository::new(self.conn);
        let mut tag = repo.get_tag(id)?.ok_or(RepoError::NotFound(id))?;
        tag.name = name;
        repo.update_tag(&tag)?;
        Ok(tag)
    }

    pub fn recolor_tag(&self, id: TagId, color: &str) -> RepoResult<Tag> {
        let color = normalize_tag_color(color)
            .ok_or_else(|| RepoError::InvalidInput(format!("invalid tag color `{color}`")))?;
        let repo = SqliteTagRepository::new(self.conn);
        let mut tag = repo.get_tag(id)?.ok_or(RepoError::NotFound(id))?;
        tag.color = color;
        repo.update_tag(&tag)?;
        Ok(tag)
    }

    pub fn delete_tag(&self, id: TagId) -> RepoResult<()> {
        SqliteTagRepository::new(self.conn).delete_tag(id)
    }

    pub fn list_tags(&self) -> RepoResult<Vec<Tag>> {
        SqliteTagRepository::new(self.conn).list_tags()
    }

    pub fn log_urge(
        &self,
        timestamp_ms: i64,
        intensity: u8,
        resisted: bool,
        note: impl Into<String>,
    ) -> RepoResult<UrgeLog> {
        let urge = UrgeLog {
            id: Uuid::new_v4(),
            timestamp_ms,
            intensity,
            resisted,
            note: note.into(),
        };
        SqliteCatalogRepository::new(self.conn).insert_urge_log(&urge)?;
        Ok(urge)
    }
}
