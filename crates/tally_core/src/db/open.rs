//! Connection bootstrap utilities for the Shared Store.
//!
//! # Responsibility
//! - Open file or in-memory SQLite connections.
//! - Configure pragmas required for multi-process access.
//! - Trigger schema migrations before returning a usable connection.
//!
//! # Invariants
//! - Returned connections have `foreign_keys=ON` and a busy timeout.
//! - Returned connections have migrations fully applied.

use super::migrations::apply_migrations;
use super::DbResult;
use log::{error, info};
use rusqlite::Connection;
use std::path::Path;
use std::time::{Duration, Instant};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Journal configuration of a file-backed store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalProfile {
    /// WAL journal with shared-memory index, usable by several processes.
    Shared,
    /// Plain rollback journal, no shared-memory companion file.
    LocalOnly,
}

impl JournalProfile {
    fn as_str(self) -> &'static str {
        match self {
            Self::Shared => "shared",
            Self::LocalOnly => "local_only",
        }
    }

    fn pragma(self) -> &'static str {
        match self {
            Self::Shared => "PRAGMA journal_mode = WAL;",
            Self::LocalOnly => "PRAGMA journal_mode = DELETE;",
        }
    }
}

/// Opens a store file and applies all pending migrations.
///
/// # Side effects
/// - Creates the file when missing.
/// - Emits `db_open` logging events with duration and status.
pub fn open_db(path: impl AsRef<Path>, profile: JournalProfile) -> DbResult<Connection> {
    let started_at = Instant::now();
    let mode = profile.as_str();
    info!("event=db_open module=db status=start mode={mode}");

    let mut conn = match Connection::open(path) {
        Ok(conn) => conn,
        Err(err) => {
            error!(
                "event=db_open module=db status=error mode={mode} duration_ms={} \
                 error_code=db_open_failed error={}",
                started_at.elapsed().as_millis(),
                err
            );
            return Err(err.into());
        }
    };

    let result = configure_journal(&conn, profile).and_then(|()| bootstrap_connection(&mut conn));
    match result {
        Ok(()) => {
            info!(
                "event=db_open module=db status=ok mode={mode} duration_ms={}",
                started_at.elapsed().as_millis()
            );
            Ok(conn)
        }
        Err(err) => {
            error!(
                "event=db_open module=db status=error mode={mode} duration_ms={} \
                 error_code=db_bootstrap_failed error={}",
                started_at.elapsed().as_millis(),
                err
            );
            Err(err)
        }
    }
}

/// Opens a volatile in-memory store and applies all pending migrations.
pub fn open_db_in_memory() -> DbResult<Connection> {
    let started_at = Instant::now();
    info!("event=db_open module=db status=start mode=memory");

    let mut conn = match Connection::open_in_memory() {
        Ok(conn) => conn,
        Err(err) => {
            error!(
                "event=db_open module=db status=error mode=memory duration_ms={} \
                 error_code=db_open_failed error={}",
                started_at.elapsed().as_millis(),
                err
            );
            return Err(err.into());
        }
    };

    match bootstrap_connection(&mut conn) {
        Ok(()) => {
            info!(
                "event=db_open module=db status=ok mode=memory duration_ms={}",
                started_at.elapsed().as_millis()
            );
            Ok(conn)
        }
        Err(err) => {
            error!(
                "event=db_open module=db status=error mode=memory duration_ms={} \
                 error_code=db_bootstrap_failed error={}",
                started_at.elapsed().as_millis(),
                err
            );
            Err(err)
        }
    }
}

fn configure_journal(conn: &Connection, profile: JournalProfile) -> DbResult<()> {
    // journal_mode reports the resulting mode as a row.
    conn.query_row(profile.pragma(), [], |_| Ok(()))?;
    Ok(())
}

fn bootstrap_connection(conn: &mut Connection) -> DbResult<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    apply_migrations(conn)?;
    Ok(())
}
