//! One-time import from the previous-generation store.
//!
//! # Responsibility
//! - Copy tags, events (with tag links), the profile and products out of the
//!   v1 file into an empty Shared Store.
//!
//! # Invariants
//! - Runs at most once per installation, guarded by
//!   `keys::LEGACY_MIGRATION_DONE`.
//! - Never imports into a store that already holds events.
//! - All copies commit in one transaction.
//! - The guard stays unset only when copying fails after source data was
//!   found, so the next start retries.

use crate::db::LEGACY_STORE_FILE_NAME;
use crate::model::catalog::{Product, Profile};
use crate::model::event::LoggedEvent;
use crate::model::tag::{normalize_tag_color, normalize_tag_name, Tag, DEFAULT_TAG_COLOR};
use crate::repo::catalog_repo::{CatalogRepository, SqliteCatalogRepository};
use crate::repo::event_repo::{EventRepository, SqliteEventRepository};
use crate::repo::tag_repo::{SqliteTagRepository, TagRepository};
use crate::repo::RepoResult;
use crate::side_channel::{keys, SideChannel};
use log::{error, info, warn};
use rusqlite::{Connection, OpenFlags};
use std::collections::HashMap;
use std::path::Path;
use uuid::Uuid;

/// Schema of the v1 store. Ids are integers, timestamps are fractional
/// seconds since the epoch.
pub const LEGACY_V1_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS tag (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    color TEXT
);
CREATE TABLE IF NOT EXISTS cigarette (
    id INTEGER PRIMARY KEY,
    timestamp REAL NOT NULL,
    note TEXT
);
CREATE TABLE IF NOT EXISTS cigarette_tag (
    cigarette_id INTEGER NOT NULL,
    tag_id INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS profile (
    id INTEGER PRIMARY KEY,
    name TEXT,
    baseline INTEGER,
    created REAL
);
CREATE TABLE IF NOT EXISTS product (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    pack_size INTEGER,
    price_cents INTEGER
);
";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// Guard already set by an earlier run.
    AlreadyDone,
    /// The Shared Store already had events.
    SkippedNonEmpty,
    /// No v1 file, or a file without v1 data.
    NothingToMigrate,
    Migrated {
        tags: usize,
        events: usize,
        profile: bool,
        products: usize,
    },
    /// Copy failed after data was found; guard left unset.
    Failed(String),
    /// In-memory store; there is no directory to look in.
    NotApplicable,
}

#[derive(Debug, Default)]
struct LegacyData {
    tags: Vec<(i64, String, Option<String>)>,
    events: Vec<(i64, f64, Option<String>)>,
    links: Vec<(i64, i64)>,
    profile: Option<(Option<String>, Option<u32>, Option<f64>)>,
    products: Vec<(String, Option<u32>, Option<i64>)>,
}

impl LegacyData {
    fn is_empty(&self) -> bool {
        self.tags.is_empty()
            && self.events.is_empty()
            && self.profile.is_none()
            && self.products.is_empty()
    }
}

/// Imports the v1 store found in `dir` into `conn` if that never happened.
pub fn migrate_legacy_store(
    conn: &mut Connection,
    dir: &Path,
    side_channel: &SideChannel,
) -> MigrationOutcome {
    match side_channel.get::<bool>(keys::LEGACY_MIGRATION_DONE) {
        Ok(Some(true)) => return MigrationOutcome::AlreadyDone,
        Ok(_) => {}
        Err(err) => {
            warn!("event=legacy_migration module=provision status=guard_unreadable error={err}")
        }
    }

    let outcome = run_migration(conn, &dir.join(LEGACY_STORE_FILE_NAME));
    if !matches!(outcome, MigrationOutcome::Failed(_)) {
        if let Err(err) = side_channel.set(keys::LEGACY_MIGRATION_DONE, &true) {
            warn!("event=legacy_migration module=provision status=guard_write_failed error={err}");
        }
    }
    outcome
}

fn run_migration(conn: &mut Connection, legacy_path: &Path) -> MigrationOutcome {
    match SqliteEventRepository::new(conn).count_events() {
        Ok(0) => {}
        Ok(_) => {
            info!("event=legacy_migration module=provision status=skipped reason=store_not_empty");
            return MigrationOutcome::SkippedNonEmpty;
        }
        Err(err) => return MigrationOutcome::Failed(err.to_string()),
    }

    let Some(legacy) = open_legacy(legacy_path) else {
        info!("event=legacy_migration module=provision status=skipped reason=no_legacy_store");
        return MigrationOutcome::NothingToMigrate;
    };

    let data = match read_legacy(&legacy) {
        Ok(data) => data,
        Err(err) => {
            error!("event=legacy_migration module=provision status=error stage=read error={err}");
            return MigrationOutcome::Failed(err.to_string());
        }
    };
    drop(legacy);
    if data.is_empty() {
        return MigrationOutcome::NothingToMigrate;
    }

    match copy_into(conn, &data) {
        Ok(outcome) => {
            info!("event=legacy_migration module=provision status=ok outcome={outcome:?}");
            outcome
        }
        Err(err) => {
            error!("event=legacy_migration module=provision status=error stage=copy error={err}");
            MigrationOutcome::Failed(err.to_string())
        }
    }
}

/// Read-only handle on a v1 file that actually carries the v1 schema.
fn open_legacy(path: &Path) -> Option<Connection> {
    if !path.exists() {
        return None;
    }
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY).ok()?;
    let has_schema: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'cigarette';",
            [],
            |row| row.get(0),
        )
        .ok()?;
    (has_schema > 0).then_some(conn)
}

fn read_legacy(conn: &Connection) -> rusqlite::Result<LegacyData> {
    let mut data = LegacyData::default();

    if table_exists(conn, "tag")? {
        let mut stmt = conn.prepare("SELECT id, name, color FROM tag ORDER BY id;")?;
        data.tags = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
            .collect::<rusqlite::Result<_>>()?;
    }

    let mut stmt =
        conn.prepare("SELECT id, timestamp, note FROM cigarette ORDER BY timestamp;")?;
    data.events = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
        .collect::<rusqlite::Result<_>>()?;

    if table_exists(conn, "cigarette_tag")? {
        let mut stmt = conn.prepare("SELECT cigarette_id, tag_id FROM cigarette_tag;")?;
        data.links = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<_>>()?;
    }

    if table_exists(conn, "profile")? {
        let mut stmt =
            conn.prepare("SELECT name, baseline, created FROM profile ORDER BY id LIMIT 1;")?;
        let mut rows = stmt.query([])?;
        if let Some(row) = rows.next()? {
            data.profile = Some((row.get(0)?, row.get(1)?, row.get(2)?));
        }
    }

    if table_exists(conn, "product")? {
        let mut stmt =
            conn.prepare("SELECT name, pack_size, price_cents FROM product ORDER BY id;")?;
        data.products = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
            .collect::<rusqlite::Result<_>>()?;
    }

    Ok(data)
}

fn copy_into(conn: &mut Connection, data: &LegacyData) -> RepoResult<MigrationOutcome> {
    let tx = conn.transaction()?;
    let outcome = {
        let tags = SqliteTagRepository::new(&tx);
        let mut tag_by_old_id: HashMap<i64, Uuid> = HashMap::new();
        let mut tag_by_name: HashMap<String, Uuid> = HashMap::new();
        for (old_id, name, color) in &data.tags {
            let Some(name) = normalize_tag_name(name) else {
                continue;
            };
            let key = name.to_lowercase();
            if let Some(existing) = tag_by_name.get(&key) {
                tag_by_old_id.insert(*old_id, *existing);
                continue;
            }
            let color = color
                .as_deref()
                .and_then(normalize_tag_color)
                .unwrap_or_else(|| DEFAULT_TAG_COLOR.to_string());
            let tag = Tag::new(name, color);
            tags.insert_tag(&tag)?;
            tag_by_old_id.insert(*old_id, tag.id);
            tag_by_name.insert(key, tag.id);
        }

        let mut links_by_event: HashMap<i64, Vec<Uuid>> = HashMap::new();
        for (event_id, tag_id) in &data.links {
            if let Some(tag) = tag_by_old_id.get(tag_id) {
                links_by_event.entry(*event_id).or_default().push(*tag);
            }
        }

        let events = SqliteEventRepository::new(&tx);
        let mut copied = 0;
        for (old_id, seconds, note) in &data.events {
            let note = note.clone().unwrap_or_default();
            let mut event = LoggedEvent::new(seconds_to_ms(*seconds), note);
            if event.validate().is_err() {
                warn!("event=legacy_migration module=provision status=row_skipped kind=event");
                continue;
            }
            let mut tag_ids = links_by_event.remove(old_id).unwrap_or_default();
            tag_ids.sort();
            tag_ids.dedup();
            event.tag_ids = tag_ids;
            events.insert_event(&event)?;
            copied += 1;
        }

        let catalog = SqliteCatalogRepository::new(&tx);
        if let Some((name, baseline, created)) = &data.profile {
            catalog.save_profile(&Profile {
                id: Uuid::new_v4(),
                display_name: name.clone().unwrap_or_default(),
                baseline_per_day: *baseline,
                created_at_ms: created.map(seconds_to_ms).unwrap_or(0),
            })?;
        }
        for (name, pack_size, price) in &data.products {
            catalog.insert_product(&Product {
                id: Uuid::new_v4(),
                name: name.clone(),
                units_per_pack: pack_size.unwrap_or(20),
                price_minor: price.unwrap_or(0),
            })?;
        }

        MigrationOutcome::Migrated {
            tags: tag_by_name.len(),
            events: copied,
            profile: data.profile.is_some(),
            products: data.products.len(),
        }
    };
    tx.commit()?;
    Ok(outcome)
}

fn table_exists(conn: &Connection, name: &str) -> rusqlite::Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1;",
        [name],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn seconds_to_ms(seconds: f64) -> i64 {
    (seconds * 1000.0).round() as i64
}

#[cfg(test)]
mod tests {
    use super::{migrate_legacy_store, seconds_to_ms, MigrationOutcome, LEGACY_V1_SCHEMA};
    use crate::db::{open_db_in_memory, LEGACY_STORE_FILE_NAME};
    use crate::repo::event_repo::{EventRepository, SqliteEventRepository};
    use crate::repo::tag_repo::{SqliteTagRepository, TagRepository};
    use crate::side_channel::{keys, SideChannel};
    use rusqlite::Connection;

    fn write_legacy(dir: &std::path::Path) {
        let legacy = Connection::open(dir.join(LEGACY_STORE_FILE_NAME)).unwrap();
        legacy.execute_batch(LEGACY_V1_SCHEMA).unwrap();
        legacy
            .execute_batch(
                "INSERT INTO tag (id, name, color)
                     VALUES (1, 'Coffee', '#a0522d'), (2, 'coffee', NULL);
                 INSERT INTO cigarette (id, timestamp, note)
                     VALUES (1, 1700000000.5, 'morning'), (2, 1700003600, NULL);
                 INSERT INTO cigarette_tag (cigarette_id, tag_id) VALUES (1, 1), (2, 2), (2, 9);
                 INSERT INTO profile (id, name, baseline, created) VALUES (1, 'me', 15, 1690000000);
                 INSERT INTO product (id, name, pack_size, price_cents)
                     VALUES (1, 'Brand', 20, 850);",
            )
            .unwrap();
    }

    #[test]
    fn seconds_convert_to_rounded_millis() {
        assert_eq!(seconds_to_ms(2.5), 2_500);
        assert_eq!(seconds_to_ms(1_700_000_000.0), 1_700_000_000_000);
    }

    #[test]
    fn copies_every_kind_once_and_relinks_tags() {
        let dir = tempfile::tempdir().unwrap();
        write_legacy(dir.path());
        let side = SideChannel::open_in_memory().unwrap();
        let mut conn = open_db_in_memory().unwrap();

        let outcome = migrate_legacy_store(&mut conn, dir.path(), &side);
        assert_eq!(
            outcome,
            MigrationOutcome::Migrated {
                tags: 1,
                events: 2,
                profile: true,
                products: 1,
            }
        );

        let tags = SqliteTagRepository::new(&conn).list_tags().unwrap();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].color, "#A0522D");
        let events = SqliteEventRepository::new(&conn)
            .list_events_between(0, i64::MAX)
            .unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].timestamp_ms, 1_700_000_000_500);
        assert!(events.iter().all(|event| event.tag_ids == vec![tags[0].id]));
        assert_eq!(side.get::<bool>(keys::LEGACY_MIGRATION_DONE).unwrap(), Some(true));

        let again = migrate_legacy_store(&mut conn, dir.path(), &side);
        assert_eq!(again, MigrationOutcome::AlreadyDone);
        assert_eq!(SqliteEventRepository::new(&conn).count_events().unwrap(), 2);
    }

    #[test]
    fn missing_legacy_file_marks_done() {
        let dir = tempfile::tempdir().unwrap();
        let side = SideChannel::open_in_memory().unwrap();
        let mut conn = open_db_in_memory().unwrap();

        let outcome = migrate_legacy_store(&mut conn, dir.path(), &side);
        assert_eq!(outcome, MigrationOutcome::NothingToMigrate);
        assert_eq!(side.get::<bool>(keys::LEGACY_MIGRATION_DONE).unwrap(), Some(true));
    }

    #[test]
    fn lost_guard_does_not_duplicate_into_populated_store() {
        let dir = tempfile::tempdir().unwrap();
        write_legacy(dir.path());
        let side = SideChannel::open_in_memory().unwrap();
        let mut conn = open_db_in_memory().unwrap();
        migrate_legacy_store(&mut conn, dir.path(), &side);
        side.remove(keys::LEGACY_MIGRATION_DONE).unwrap();

        let outcome = migrate_legacy_store(&mut conn, dir.path(), &side);
        assert_eq!(outcome, MigrationOutcome::SkippedNonEmpty);
        assert_eq!(SqliteEventRepository::new(&conn).count_events().unwrap(), 2);
    }
}
