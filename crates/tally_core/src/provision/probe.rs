//! Integrity probes and failure classification.

use crate::db::{DbError, RECORD_KINDS};
use rusqlite::{Connection, ErrorCode};
use std::fmt::{Display, Formatter};

/// How a store failure should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Schema absent; the store must be rebuilt.
    MissingTable,
    /// Transient contention; retry later, never repair.
    Locked,
    /// Unrecoverable in place.
    Corrupt,
    /// Not an integrity problem (I/O, permissions, newer schema).
    Unavailable,
}

impl FailureClass {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MissingTable => "missing_table",
            Self::Locked => "locked",
            Self::Corrupt => "corrupt",
            Self::Unavailable => "unavailable",
        }
    }

    /// Whether this failure is handled by repair/salvage.
    pub fn needs_repair(self) -> bool {
        matches!(self, Self::MissingTable | Self::Corrupt)
    }
}

/// One failed probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeFailure {
    pub kind: &'static str,
    pub class: FailureClass,
    pub message: String,
}

impl Display for ProbeFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "probe on `{}` failed ({}): {}",
            self.kind,
            self.class.as_str(),
            self.message
        )
    }
}

/// Reads at most one row of every record kind.
pub fn probe_store(conn: &Connection) -> Result<(), ProbeFailure> {
    for kind in RECORD_KINDS {
        let sql = format!("SELECT * FROM {kind} LIMIT 1;");
        let result = conn
            .prepare(&sql)
            .and_then(|mut stmt| stmt.query([]).and_then(|mut rows| rows.next().map(|_| ())));
        if let Err(err) = result {
            return Err(ProbeFailure {
                kind,
                class: classify_sqlite_error(&err),
                message: err.to_string(),
            });
        }
    }
    Ok(())
}

pub fn classify_sqlite_error(err: &rusqlite::Error) -> FailureClass {
    match err {
        rusqlite::Error::SqliteFailure(inner, message) => match inner.code {
            ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => FailureClass::Locked,
            ErrorCode::DatabaseCorrupt | ErrorCode::NotADatabase => FailureClass::Corrupt,
            ErrorCode::CannotOpen
            | ErrorCode::PermissionDenied
            | ErrorCode::ReadOnly
            | ErrorCode::DiskFull
            | ErrorCode::SystemIoFailure => FailureClass::Unavailable,
            _ => {
                let text = message.as_deref().unwrap_or_default();
                if text.contains("no such table") {
                    FailureClass::MissingTable
                } else {
                    FailureClass::Corrupt
                }
            }
        },
        _ => FailureClass::Corrupt,
    }
}

pub fn classify_db_error(err: &DbError) -> FailureClass {
    match err {
        DbError::Sqlite(inner) => classify_sqlite_error(inner),
        DbError::UnsupportedSchemaVersion { .. } => FailureClass::Unavailable,
    }
}

#[cfg(test)]
mod tests {
    use super::{probe_store, FailureClass};
    use crate::db::open_db_in_memory;

    #[test]
    fn healthy_store_passes_every_probe() {
        let conn = open_db_in_memory().unwrap();
        assert!(probe_store(&conn).is_ok());
    }

    #[test]
    fn dropped_table_is_classified_missing() {
        let conn = open_db_in_memory().unwrap();
        conn.execute_batch("DROP TABLE urge_logs;").unwrap();

        let failure = probe_store(&conn).unwrap_err();
        assert_eq!(failure.kind, "urge_logs");
        assert_eq!(failure.class, FailureClass::MissingTable);
        assert!(failure.class.needs_repair());
    }

    #[test]
    fn locked_is_never_repaired() {
        assert!(!FailureClass::Locked.needs_repair());
        assert!(!FailureClass::Unavailable.needs_repair());
    }
}
