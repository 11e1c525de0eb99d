//! Shared Store bootstrap and schema migration entry points.
//!
//! # Responsibility
//! - Open and configure SQLite connections for the Shared Store.
//! - Apply schema migrations in deterministic order.
//! - Name the on-disk files of both store generations.
//!
//! # Invariants
//! - Migration version is tracked via `PRAGMA user_version`.
//! - Core code must not read/write application data before migrations succeed.

use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod migrations;
mod open;

pub use open::{open_db, open_db_in_memory, JournalProfile};

/// File name of the current ("v2") store generation.
pub const STORE_FILE_NAME: &str = "tally_v2.sqlite3";
/// File name of the previous ("v1") store generation.
pub const LEGACY_STORE_FILE_NAME: &str = "tally_v1.sqlite3";
/// Companion files SQLite may create next to a database file.
pub const COMPANION_SUFFIXES: &[&str] = &["-wal", "-shm", "-journal"];

/// Every record kind of the current generation, in dependency order
/// (referenced kinds first).
pub const RECORD_KINDS: &[&str] = &[
    "events",
    "tags",
    "event_tags",
    "profiles",
    "products",
    "urge_logs",
];

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::UnsupportedSchemaVersion {
                db_version,
                latest_supported,
            } => write!(
                f,
                "database schema version {db_version} is newer than supported {latest_supported}"
            ),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::UnsupportedSchemaVersion { .. } => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}
