//! Salvage, file removal and rebuild of a damaged store.
//!
//! # Invariants
//! - Salvage is best-effort: unreadable kinds and rows are skipped.
//! - Store files are removed only after the damaged connection is dropped.
//! - Salvaged records are reinserted in one transaction; a record the fresh
//!   store rejects is skipped on its own savepoint and never aborts the rest.
//! - A failed repair ends in an empty store, never in a retry loop.

use crate::db::{open_db, DbError, JournalProfile, COMPANION_SUFFIXES, LEGACY_STORE_FILE_NAME};
use crate::model::catalog::{Product, Profile, UrgeLog};
use crate::model::event::LoggedEvent;
use crate::model::tag::Tag;
use crate::repo::catalog_repo::{CatalogRepository, SqliteCatalogRepository};
use crate::repo::event_repo::{EventRepository, SqliteEventRepository};
use crate::repo::tag_repo::{SqliteTagRepository, TagRepository};
use crate::repo::{RepoError, RepoResult};
use crate::side_channel::{keys, SideChannel};
use log::{debug, error, info, warn};
use rusqlite::{Connection, Transaction};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Diagnostics of one repair run, also persisted in the side-channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairOutcome {
    pub succeeded: bool,
    /// Records that made it into the rebuilt store.
    pub salvaged: usize,
    pub at_ms: i64,
}

/// Records read out of a damaged store.
#[derive(Debug, Clone, Default)]
pub struct Salvage {
    pub tags: Vec<Tag>,
    pub events: Vec<LoggedEvent>,
    pub profile: Option<Profile>,
    pub products: Vec<Product>,
    pub urge_logs: Vec<UrgeLog>,
}

impl Salvage {
    pub fn len(&self) -> usize {
        self.tags.len()
            + self.events.len()
            + usize::from(self.profile.is_some())
            + self.products.len()
            + self.urge_logs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Reads every record of every kind, ignoring individual failures.
pub fn salvage_records(conn: &Connection) -> Salvage {
    let tags = read_rows(conn, "SELECT uuid, name, color FROM tags;", |row| {
        Ok(Tag {
            id: uuid_column(row, 0)?,
            name: row.get(1)?,
            color: row.get(2)?,
        })
    });

    let links = read_rows(conn, "SELECT event_uuid, tag_uuid FROM event_tags;", |row| {
        Ok((uuid_column(row, 0)?, uuid_column(row, 1)?))
    });
    let known_tags: HashSet<Uuid> = tags.iter().map(|tag| tag.id).collect();
    let mut links_by_event: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
    for (event_id, tag_id) in links {
        if known_tags.contains(&tag_id) {
            links_by_event.entry(event_id).or_default().push(tag_id);
        }
    }

    let events = read_rows(conn, "SELECT uuid, timestamp_ms, note FROM events;", |row| {
        Ok(LoggedEvent::with_id(
            uuid_column(row, 0)?,
            row.get(1)?,
            row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        ))
    })
    .into_iter()
    .filter(|event| event.validate().is_ok())
    .map(|mut event| {
        event.tag_ids = links_by_event.remove(&event.id).unwrap_or_default();
        event.tag_ids.sort();
        event
    })
    .collect();

    let profile = read_rows(
        conn,
        "SELECT uuid, display_name, baseline_per_day, created_at FROM profiles LIMIT 1;",
        |row| {
            Ok(Profile {
                id: uuid_column(row, 0)?,
                display_name: row.get(1)?,
                baseline_per_day: row.get(2)?,
                created_at_ms: row.get(3)?,
            })
        },
    )
    .into_iter()
    .next();

    let products = read_rows(
        conn,
        "SELECT uuid, name, units_per_pack, price_minor FROM products;",
        |row| {
            Ok(Product {
                id: uuid_column(row, 0)?,
                name: row.get(1)?,
                units_per_pack: row.get(2)?,
                price_minor: row.get(3)?,
            })
        },
    );

    let urge_logs = read_rows(
        conn,
        "SELECT uuid, timestamp_ms, intensity, resisted, note FROM urge_logs;",
        |row| {
            Ok(UrgeLog {
                id: uuid_column(row, 0)?,
                timestamp_ms: row.get(1)?,
                intensity: row.get(2)?,
                resisted: row.get::<_, i64>(3)? != 0,
                note: row.get(4)?,
            })
        },
    );

    Salvage {
        tags,
        events,
        profile,
        products,
        urge_logs,
    }
}

/// Deletes the store file, its companions, and previous-generation files
/// in the same directory. Missing files are ignored.
pub fn remove_store_files(path: &Path) {
    let mut targets = companion_paths(path);
    if let Some(dir) = path.parent() {
        targets.extend(companion_paths(&dir.join(LEGACY_STORE_FILE_NAME)));
    }
    for target in targets {
        match std::fs::remove_file(&target) {
            Ok(()) => info!("event=store_file_removed module=provision status=ok"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => warn!("event=store_file_removed module=provision status=error error={err}"),
        }
    }
}

/// Rebuilds the store at `path` from whatever `damaged` still yields.
///
/// Pass `None` when the file could not even be opened. Always persists the
/// outcome flags in the side-channel (best effort).
///
/// # Errors
/// - Returns an error only when even an empty store cannot be recreated.
pub fn repair_store(
    damaged: Option<Connection>,
    path: &Path,
    profile: JournalProfile,
    side_channel: &SideChannel,
    now_ms: i64,
) -> Result<(Connection, RepairOutcome), DbError> {
    let salvage = damaged.as_ref().map(salvage_records).unwrap_or_default();
    drop(damaged);
    info!(
        "event=store_repair module=provision status=start read={}",
        salvage.len()
    );

    let (conn, reinserted) = rebuild_or_reset(path, profile, |conn| {
        if salvage.is_empty() {
            Ok(0)
        } else {
            reinsert(conn, &salvage)
        }
    })?;
    let succeeded = reinserted.is_some();
    let salvaged = reinserted.unwrap_or(0);

    let outcome = RepairOutcome {
        succeeded,
        salvaged,
        at_ms: now_ms,
    };
    persist_outcome(side_channel, &outcome);
    info!(
        "event=store_repair module=provision status={} salvaged={salvaged}",
        if succeeded { "ok" } else { "reset" }
    );
    Ok((conn, outcome))
}

/// Removes the files, opens a fresh store and fills it with `fill`.
///
/// When opening or filling fails, the files are removed again and an empty
/// store is opened; the count is then `None`.
fn rebuild_or_reset<F>(
    path: &Path,
    profile: JournalProfile,
    fill: F,
) -> Result<(Connection, Option<usize>), DbError>
where
    F: FnOnce(&mut Connection) -> RepoResult<usize>,
{
    remove_store_files(path);
    let rebuilt = open_db(path, profile)
        .map_err(RepoError::from)
        .and_then(|mut conn| {
            let count = fill(&mut conn)?;
            Ok((conn, count))
        });

    match rebuilt {
        Ok((conn, count)) => Ok((conn, Some(count))),
        Err(err) => {
            error!("event=store_repair module=provision status=error error={err}");
            remove_store_files(path);
            Ok((open_db(path, profile)?, None))
        }
    }
}

/// Last persisted repair outcome, if any repair ever ran.
pub fn last_repair_outcome(side_channel: &SideChannel) -> Option<RepairOutcome> {
    let result = side_channel.get::<String>(keys::STORE_REPAIR_RESULT).ok()??;
    Some(RepairOutcome {
        succeeded: result == "succeeded",
        salvaged: side_channel
            .get::<usize>(keys::STORE_REPAIR_SALVAGED)
            .ok()
            .flatten()
            .unwrap_or(0),
        at_ms: side_channel
            .get::<i64>(keys::STORE_REPAIR_AT_MS)
            .ok()
            .flatten()
            .unwrap_or(0),
    })
}

fn persist_outcome(side_channel: &SideChannel, outcome: &RepairOutcome) {
    let result = if outcome.succeeded {
        "succeeded"
    } else {
        "failed"
    };
    let persisted = side_channel
        .set(keys::STORE_REPAIR_RESULT, &result)
        .and_then(|()| side_channel.set(keys::STORE_REPAIR_AT_MS, &outcome.at_ms))
        .and_then(|()| side_channel.set(keys::STORE_REPAIR_SALVAGED, &outcome.salvaged));
    if let Err(err) = persisted {
        warn!("event=store_repair_flags module=provision status=error error={err}");
    }
}

/// Reinserts the salvage in one transaction. Returns how many records were
/// kept; records the fresh store rejects are skipped one by one.
fn reinsert(conn: &mut Connection, salvage: &Salvage) -> RepoResult<usize> {
    let mut tx = conn.transaction()?;
    let mut kept = 0;
    let mut kept_tags = HashSet::new();

    for tag in &salvage.tags {
        if insert_isolated(&mut tx, "tags", |conn| {
            SqliteTagRepository::new(conn).insert_tag(tag).map(|_| ())
        })? {
            kept_tags.insert(tag.id);
            kept += 1;
        }
    }
    for event in &salvage.events {
        let mut event = event.clone();
        event.tag_ids.retain(|tag_id| kept_tags.contains(tag_id));
        if insert_isolated(&mut tx, "events", |conn| {
            SqliteEventRepository::new(conn)
                .insert_event_if_absent(&event)
                .map(|_| ())
        })? {
            kept += 1;
        }
    }
    if let Some(profile) = &salvage.profile {
        if insert_isolated(&mut tx, "profiles", |conn| {
            SqliteCatalogRepository::new(conn).save_profile(profile)
        })? {
            kept += 1;
        }
    }
    for product in &salvage.products {
        if insert_isolated(&mut tx, "products", |conn| {
            SqliteCatalogRepository::new(conn).insert_product(product)
        })? {
            kept += 1;
        }
    }
    for urge in &salvage.urge_logs {
        if insert_isolated(&mut tx, "urge_logs", |conn| {
            SqliteCatalogRepository::new(conn).insert_urge_log(urge)
        })? {
            kept += 1;
        }
    }

    tx.commit()?;
    let skipped = salvage.len() - kept;
    if skipped > 0 {
        warn!(
            "event=store_repair_reinsert module=provision status=degraded \
             kept={kept} skipped={skipped}"
        );
    }
    Ok(kept)
}

/// Runs one insert on its own savepoint. A rejected record rolls back only
/// itself and yields `Ok(false)`.
fn insert_isolated<F>(tx: &mut Transaction<'_>, kind: &str, insert: F) -> RepoResult<bool>
where
    F: FnOnce(&Connection) -> RepoResult<()>,
{
    let savepoint = tx.savepoint()?;
    match insert(&savepoint) {
        Ok(()) => {
            savepoint.commit()?;
            Ok(true)
        }
        Err(err) => {
            debug!(
                "event=store_repair_record module=provision status=skipped \
                 kind={kind} error={err}"
            );
            Ok(false)
        }
    }
}

fn read_rows<T, F>(conn: &Connection, sql: &str, map: F) -> Vec<T>
where
    F: FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<T>,
{
    let Ok(mut stmt) = conn.prepare(sql) else {
        return Vec::new();
    };
    let Ok(rows) = stmt.query_map([], map) else {
        return Vec::new();
    };
    rows.filter_map(Result::ok).collect()
}

fn uuid_column(row: &rusqlite::Row<'_>, index: usize) -> rusqlite::Result<Uuid> {
    let text: String = row.get(index)?;
    Uuid::parse_str(&text).map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(
            index,
            rusqlite::types::Type::Text,
            Box::new(err),
        )
    })
}

fn companion_paths(path: &Path) -> Vec<PathBuf> {
    let mut paths = vec![path.to_path_buf()];
    for suffix in COMPANION_SUFFIXES {
        let mut name = path.as_os_str().to_os_string();
        name.push(suffix);
        paths.push(PathBuf::from(name));
    }
    paths
}

#[cfg(test)]
mod tests {
    use super::{
        companion_paths, last_repair_outcome, persist_outcome, rebuild_or_reset, reinsert,
        salvage_records, RepairOutcome, Salvage,
    };
    use crate::db::{open_db_in_memory, JournalProfile, STORE_FILE_NAME};
    use crate::model::catalog::UrgeLog;
    use crate::model::event::LoggedEvent;
    use crate::model::tag::Tag;
    use crate::repo::catalog_repo::{CatalogRepository, SqliteCatalogRepository};
    use crate::repo::event_repo::{EventRepository, SqliteEventRepository};
    use crate::repo::tag_repo::{SqliteTagRepository, TagRepository};
    use crate::repo::RepoError;
    use crate::side_channel::SideChannel;
    use std::path::Path;
    use uuid::Uuid;

    fn urge(intensity: u8) -> UrgeLog {
        UrgeLog {
            id: Uuid::new_v4(),
            timestamp_ms: 50,
            intensity,
            resisted: true,
            note: String::new(),
        }
    }

    #[test]
    fn companion_paths_cover_wal_shm_and_journal() {
        let paths = companion_paths(Path::new("/data/tally_v2.sqlite3"));
        let names: Vec<String> = paths
            .iter()
            .map(|path| path.display().to_string())
            .collect();
        assert!(names.contains(&"/data/tally_v2.sqlite3".to_string()));
        assert!(names.contains(&"/data/tally_v2.sqlite3-wal".to_string()));
        assert!(names.contains(&"/data/tally_v2.sqlite3-shm".to_string()));
        assert!(names.contains(&"/data/tally_v2.sqlite3-journal".to_string()));
    }

    #[test]
    fn salvage_survives_a_missing_kind() {
        let conn = open_db_in_memory().unwrap();
        let tag = Tag::new("stress", "#FF0000");
        SqliteTagRepository::new(&conn).insert_tag(&tag).unwrap();
        let mut event = LoggedEvent::new(10, "x");
        event.tag_ids = vec![tag.id];
        SqliteEventRepository::new(&conn).insert_event(&event).unwrap();
        conn.execute_batch("DROP TABLE products;").unwrap();

        let salvage = salvage_records(&conn);
        assert_eq!(salvage.tags.len(), 1);
        assert_eq!(salvage.events.len(), 1);
        assert_eq!(salvage.events[0].tag_ids, vec![tag.id]);
        assert!(salvage.products.is_empty());
        assert_eq!(salvage.len(), 2);
    }

    #[test]
    fn reinsert_skips_rejected_records_and_keeps_the_rest() {
        let mut conn = open_db_in_memory().unwrap();
        let tag = Tag::new("stress", "#FF0000");
        let mut linked = LoggedEvent::new(10, "x");
        linked.tag_ids = vec![tag.id, Uuid::new_v4()];
        let salvage = Salvage {
            tags: vec![tag.clone()],
            events: vec![linked.clone(), LoggedEvent::new(20, "y")],
            urge_logs: vec![urge(9), urge(3)],
            ..Salvage::default()
        };

        let kept = reinsert(&mut conn, &salvage).unwrap();
        assert_eq!(kept, 4);

        let events = SqliteEventRepository::new(&conn);
        assert_eq!(events.count_events().unwrap(), 2);
        let stored = events.get_event(linked.id).unwrap().unwrap();
        assert_eq!(stored.tag_ids, vec![tag.id]);
        let urges = SqliteCatalogRepository::new(&conn)
            .list_urge_logs_between(0, 100)
            .unwrap();
        assert_eq!(urges.len(), 1);
        assert_eq!(urges[0].intensity, 3);
    }

    #[test]
    fn failed_fill_resets_to_an_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(STORE_FILE_NAME);

        let (conn, count) = rebuild_or_reset(&path, JournalProfile::Shared, |conn| {
            SqliteEventRepository::new(conn).insert_event(&LoggedEvent::new(10, "x"))?;
            Err(RepoError::InvalidInput("rejected".to_string()))
        })
        .unwrap();

        assert_eq!(count, None);
        assert_eq!(SqliteEventRepository::new(&conn).count_events().unwrap(), 0);
    }

    #[test]
    fn failed_outcome_round_trips_through_the_side_channel() {
        let side = SideChannel::open_in_memory().unwrap();
        let outcome = RepairOutcome {
            succeeded: false,
            salvaged: 0,
            at_ms: 77,
        };
        persist_outcome(&side, &outcome);
        assert_eq!(last_repair_outcome(&side), Some(outcome));
    }
}
