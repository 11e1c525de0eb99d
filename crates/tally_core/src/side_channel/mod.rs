//! Shared Side-Channel: a tiny namespaced key/value store.
//!
//! # Responsibility
//! - Give host, extension and tooling a cheap place for cross-process
//!   signals (snapshot counters, watermark, pending-write queue, per-day
//!   event lists, diagnostics flags).
//! - Degrade from the shared directory to the private directory and
//!   finally to memory, like the Shared Store does.
//!
//! # Invariants
//! - Values are JSON documents; a key never changes its value type.
//! - Read-modify-write helpers run in `IMMEDIATE` transactions, so two
//!   processes updating the same key never lose an update.
//! - The watermark never moves backwards.

pub mod keys;

use crate::config::TallyConfig;
use crate::model::snapshot::{EventSummary, SyncSnapshot};
use chrono::NaiveDate;
use log::{error, warn};
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File name of the side-channel database.
pub const SIDE_CHANNEL_FILE_NAME: &str = "tally_shared.sqlite3";
/// Namespace shared by every process of the application family.
pub const DEFAULT_NAMESPACE: &str = "group.tally";

const SCHEMA_SQL: &str = "CREATE TABLE IF NOT EXISTS kv (
    namespace TEXT NOT NULL,
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    updated_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now') * 1000),
    PRIMARY KEY (namespace, key)
);";

pub type SideChannelResult<T> = Result<T, SideChannelError>;

#[derive(Debug)]
pub enum SideChannelError {
    Sqlite(rusqlite::Error),
    Decode { key: String, message: String },
    Encode { key: String, message: String },
}

impl Display for SideChannelError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::Decode { key, message } => {
                write!(f, "side-channel value for `{key}` is malformed: {message}")
            }
            Self::Encode { key, message } => {
                write!(f, "side-channel value for `{key}` cannot be encoded: {message}")
            }
        }
    }
}

impl Error for SideChannelError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for SideChannelError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

/// Where the side-channel ended up after the fallback ladder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SideChannelLocation {
    Shared(PathBuf),
    Local(PathBuf),
    Memory,
}

pub struct SideChannel {
    conn: Connection,
    namespace: String,
    location: SideChannelLocation,
}

impl SideChannel {
    /// Opens the side-channel file inside `dir`.
    pub fn open(dir: impl AsRef<Path>) -> SideChannelResult<Self> {
        let path = dir.as_ref().join(SIDE_CHANNEL_FILE_NAME);
        let conn = Connection::open(&path)?;
        conn.query_row("PRAGMA journal_mode = WAL;", [], |_| Ok(()))?;
        Self::bootstrap(conn, SideChannelLocation::Local(path))
    }

    pub fn open_in_memory() -> SideChannelResult<Self> {
        Self::bootstrap(Connection::open_in_memory()?, SideChannelLocation::Memory)
    }

    /// Opens in the shared directory, then the private one, then memory.
    ///
    /// # Errors
    /// - Fails only when even the in-memory database cannot be created.
    pub fn open_with_fallback(config: &TallyConfig) -> SideChannelResult<Self> {
        if let Some(shared_dir) = config.resolve_shared_dir() {
            match Self::open(&shared_dir) {
                Ok(mut channel) => {
                    channel.location =
                        SideChannelLocation::Shared(shared_dir.join(SIDE_CHANNEL_FILE_NAME));
                    return Ok(channel);
                }
                Err(err) => warn!(
                    "event=side_channel_open module=side_channel status=degraded tier=shared \
                     error={err}"
                ),
            }
        }

        let local_result = std::fs::create_dir_all(&config.local_dir)
            .map_err(|err| err.to_string())
            .and_then(|()| Self::open(&config.local_dir).map_err(|err| err.to_string()));
        match local_result {
            Ok(channel) => return Ok(channel),
            Err(err) => error!(
                "event=side_channel_open module=side_channel status=degraded tier=local error={err}"
            ),
        }

        Self::open_in_memory()
    }

    fn bootstrap(conn: Connection, location: SideChannelLocation) -> SideChannelResult<Self> {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn,
            namespace: DEFAULT_NAMESPACE.to_string(),
            location,
        })
    }

    pub fn location(&self) -> &SideChannelLocation {
        &self.location
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> SideChannelResult<Option<T>> {
        read_value(&self.conn, &self.namespace, key)
    }

    pub fn set<T: Serialize>(&self, key: &str, value: &T) -> SideChannelResult<()> {
        write_value(&self.conn, &self.namespace, key, value)
    }

    pub fn remove(&self, key: &str) -> SideChannelResult<()> {
        self.conn.execute(
            "DELETE FROM kv WHERE namespace = ?1 AND key = ?2;",
            params![self.namespace.as_str(), key],
        )?;
        Ok(())
    }

    /// Atomically reads, transforms and writes one key.
    ///
    /// `apply` receives the current value and returns the value to store
    /// (`None` removes the key) plus a result handed back to the caller.
    pub fn update<T, R, F>(&self, key: &str, apply: F) -> SideChannelResult<R>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(Option<T>) -> (Option<T>, R),
    {
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;
        let current = read_value::<T>(&tx, &self.namespace, key)?;
        let (next, result) = apply(current);
        match next {
            Some(value) => write_value(&tx, &self.namespace, key, &value)?,
            None => {
                tx.execute(
                    "DELETE FROM kv WHERE namespace = ?1 AND key = ?2;",
                    params![self.namespace.as_str(), key],
                )?;
            }
        }
        tx.commit()?;
        Ok(result)
    }

    /// Current watermark, 0 when never written.
    pub fn watermark(&self) -> SideChannelResult<i64> {
        Ok(self.get::<i64>(keys::LAST_UPDATED_MS)?.unwrap_or(0))
    }

    /// Moves the watermark to `max(current, at_ms)` and returns the result.
    pub fn advance_watermark(&self, at_ms: i64) -> SideChannelResult<i64> {
        self.update::<i64, i64, _>(keys::LAST_UPDATED_MS, |current| {
            let next = current.map_or(at_ms, |value| value.max(at_ms));
            (Some(next), next)
        })
    }

    pub fn read_snapshot(&self) -> SideChannelResult<SyncSnapshot> {
        Ok(SyncSnapshot {
            today_count: self.get(keys::TODAY_COUNT)?.unwrap_or(0),
            daily_average: self.get(keys::DAILY_AVERAGE)?.unwrap_or(0.0),
            last_event_at_ms: self.get(keys::LAST_EVENT_AT_MS)?,
            watermark_ms: self.watermark()?,
        })
    }

    /// Writes snapshot fields and advances the watermark to at least `at_ms`.
    /// Returns the watermark actually stored.
    pub fn write_snapshot(&self, snapshot: &SyncSnapshot, at_ms: i64) -> SideChannelResult<i64> {
        self.set(keys::TODAY_COUNT, &snapshot.today_count)?;
        self.set(keys::DAILY_AVERAGE, &snapshot.daily_average)?;
        match snapshot.last_event_at_ms {
            Some(value) => self.set(keys::LAST_EVENT_AT_MS, &value)?,
            None => self.remove(keys::LAST_EVENT_AT_MS)?,
        }
        self.advance_watermark(at_ms.max(snapshot.watermark_ms))
    }

    pub fn write_day_events(
        &self,
        date: NaiveDate,
        events: &[EventSummary],
    ) -> SideChannelResult<()> {
        self.set(&keys::events_by_day(date), &events)
    }

    pub fn read_day_events(&self, date: NaiveDate) -> SideChannelResult<Vec<EventSummary>> {
        Ok(self.get(&keys::events_by_day(date))?.unwrap_or_default())
    }

    /// Drops per-day lists older than `keep_from`. Returns removed key count.
    pub fn prune_day_events(&self, keep_from: NaiveDate) -> SideChannelResult<usize> {
        let removed = self.conn.execute(
            "DELETE FROM kv
             WHERE namespace = ?1
               AND key >= ?2 AND key < ?3;",
            params![
                self.namespace.as_str(),
                keys::EVENTS_BY_DAY_PREFIX,
                keys::events_by_day(keep_from),
            ],
        )?;
        Ok(removed)
    }
}

fn read_value<T: DeserializeOwned>(
    conn: &Connection,
    namespace: &str,
    key: &str,
) -> SideChannelResult<Option<T>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value FROM kv WHERE namespace = ?1 AND key = ?2;",
            params![namespace, key],
            |row| row.get(0),
        )
        .optional()?;
    match raw {
        Some(text) => serde_json::from_str(&text)
            .map(Some)
            .map_err(|err| SideChannelError::Decode {
                key: key.to_string(),
                message: err.to_string(),
            }),
        None => Ok(None),
    }
}

fn write_value<T: Serialize + ?Sized>(
    conn: &Connection,
    namespace: &str,
    key: &str,
    value: &T,
) -> SideChannelResult<()> {
    let text = serde_json::to_string(value).map_err(|err| SideChannelError::Encode {
        key: key.to_string(),
        message: err.to_string(),
    })?;
    conn.execute(
        "INSERT INTO kv (namespace, key, value, updated_at)
         VALUES (?1, ?2, ?3, strftime('%s', 'now') * 1000)
         ON CONFLICT (namespace, key) DO UPDATE SET
            value = excluded.value,
            updated_at = excluded.updated_at;",
        params![namespace, key, text],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{keys, SideChannel, SideChannelError, SideChannelLocation};
    use crate::config::TallyConfig;
    use crate::model::snapshot::SyncSnapshot;
    use chrono::NaiveDate;

    #[test]
    fn watermark_never_moves_backwards() {
        let channel = SideChannel::open_in_memory().unwrap();
        assert_eq!(channel.watermark().unwrap(), 0);
        assert_eq!(channel.advance_watermark(500).unwrap(), 500);
        assert_eq!(channel.advance_watermark(200).unwrap(), 500);
        assert_eq!(channel.advance_watermark(900).unwrap(), 900);
        assert_eq!(channel.watermark().unwrap(), 900);
    }

    #[test]
    fn write_snapshot_round_trips_and_clears_last_event() {
        let channel = SideChannel::open_in_memory().unwrap();
        let snapshot = SyncSnapshot {
            today_count: 4,
            daily_average: 2.5,
            last_event_at_ms: Some(1_234),
            watermark_ms: 0,
        };
        let stored = channel.write_snapshot(&snapshot, 2_000).unwrap();
        assert_eq!(stored, 2_000);

        let read = channel.read_snapshot().unwrap();
        assert_eq!(read.today_count, 4);
        assert_eq!(read.last_event_at_ms, Some(1_234));
        assert_eq!(read.watermark_ms, 2_000);

        let empty = SyncSnapshot::default();
        channel.write_snapshot(&empty, 1_000).unwrap();
        let read = channel.read_snapshot().unwrap();
        assert_eq!(read.last_event_at_ms, None);
        assert_eq!(read.watermark_ms, 2_000);
    }

    #[test]
    fn malformed_values_surface_decode_errors() {
        let channel = SideChannel::open_in_memory().unwrap();
        channel.set(keys::TODAY_COUNT, &"many").unwrap();
        let err = channel.read_snapshot().unwrap_err();
        assert!(matches!(err, SideChannelError::Decode { .. }));
    }

    #[test]
    fn prune_removes_only_older_days() {
        let channel = SideChannel::open_in_memory().unwrap();
        let old = NaiveDate::from_ymd_opt(2026, 5, 1).unwrap();
        let kept = NaiveDate::from_ymd_opt(2026, 5, 9).unwrap();
        channel.write_day_events(old, &[]).unwrap();
        channel.write_day_events(kept, &[]).unwrap();
        channel.set(keys::TODAY_COUNT, &1_u32).unwrap();

        let removed = channel
            .prune_day_events(NaiveDate::from_ymd_opt(2026, 5, 8).unwrap())
            .unwrap();
        assert_eq!(removed, 1);
        assert!(channel.get::<serde_json::Value>(&keys::events_by_day(kept)).unwrap().is_some());
        assert_eq!(channel.get::<u32>(keys::TODAY_COUNT).unwrap(), Some(1));
    }

    #[test]
    fn two_handles_on_same_file_see_each_other() {
        let dir = tempfile::tempdir().unwrap();
        let writer = SideChannel::open(dir.path()).unwrap();
        let reader = SideChannel::open(dir.path()).unwrap();

        writer.advance_watermark(77).unwrap();
        assert_eq!(reader.watermark().unwrap(), 77);
    }

    #[test]
    fn fallback_prefers_shared_then_local() {
        let dir = tempfile::tempdir().unwrap();
        let config = TallyConfig::with_dirs(
            Some(dir.path().join("shared")),
            dir.path().join("local"),
        );
        let channel = SideChannel::open_with_fallback(&config).unwrap();
        assert!(matches!(channel.location(), SideChannelLocation::Shared(_)));

        let config = TallyConfig::with_dirs(None, dir.path().join("local"));
        let channel = SideChannel::open_with_fallback(&config).unwrap();
        assert!(matches!(channel.location(), SideChannelLocation::Local(_)));
    }
}
