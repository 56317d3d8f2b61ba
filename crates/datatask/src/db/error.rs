//! Database error types.

use std::path::PathBuf;

use rusqlite::ffi;
use thiserror::Error;

/// Errors from database operations.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// SQLite error from rusqlite.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error when creating directories or files.
    #[error("IO error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A migration failed to apply.
    #[error("Migration failed at version {version}: {reason}")]
    Migration { version: u32, reason: String },

    /// The database lock was poisoned.
    #[error("Database lock poisoned")]
    LockPoisoned,

    /// A row that must exist is missing.
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    /// A reference table has no row for the requested name.
    #[error("No {table} row named '{name}'")]
    MissingReference { table: &'static str, name: String },

    /// A stored column could not be decoded.
    #[error("Corrupt value in {column}: {reason}")]
    CorruptValue { column: &'static str, reason: String },

    /// The JSON `config` column failed to (de)serialize.
    #[error("Task config JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DatabaseError {
    /// Primary-key or unique-index violation.
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, DatabaseError::Sqlite(e) if is_unique_violation(e))
    }

    /// Foreign-key violation.
    pub fn is_foreign_key_violation(&self) -> bool {
        matches!(self, DatabaseError::Sqlite(e) if is_foreign_key_violation(e))
    }

    /// The store was busy or locked; retrying later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            DatabaseError::Sqlite(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            DatabaseError::Io { .. } => true,
            _ => false,
        }
    }
}

fn extended_code(err: &rusqlite::Error) -> Option<i32> {
    match err {
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation => {
            Some(e.extended_code)
        }
        _ => None,
    }
}

pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        extended_code(err),
        Some(ffi::SQLITE_CONSTRAINT_PRIMARYKEY) | Some(ffi::SQLITE_CONSTRAINT_UNIQUE)
    )
}

pub(crate) fn is_foreign_key_violation(err: &rusqlite::Error) -> bool {
    extended_code(err) == Some(ffi::SQLITE_CONSTRAINT_FOREIGNKEY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "PRAGMA foreign_keys=ON;
             CREATE TABLE parent (id INTEGER PRIMARY KEY);
             CREATE TABLE child (id INTEGER PRIMARY KEY, parent_id INTEGER NOT NULL REFERENCES parent(id));
             INSERT INTO parent (id) VALUES (1);",
        )
        .unwrap();
        conn
    }

    #[test]
    fn test_primary_key_violation_is_unique() {
        let conn = conn();
        let err = conn
            .execute("INSERT INTO parent (id) VALUES (1)", [])
            .unwrap_err();
        let err = DatabaseError::from(err);
        assert!(err.is_unique_violation());
        assert!(!err.is_foreign_key_violation());
    }

    #[test]
    fn test_foreign_key_violation_detected() {
        let conn = conn();
        let err = conn
            .execute("INSERT INTO child (id, parent_id) VALUES (1, 99)", [])
            .unwrap_err();
        let err = DatabaseError::from(err);
        assert!(err.is_foreign_key_violation());
        assert!(!err.is_unique_violation());
    }

    #[test]
    fn test_not_null_is_neither() {
        let conn = conn();
        let err = conn
            .execute("INSERT INTO child (id, parent_id) VALUES (2, NULL)", [])
            .unwrap_err();
        let err = DatabaseError::from(err);
        assert!(!err.is_unique_violation());
        assert!(!err.is_foreign_key_violation());
        assert!(!err.is_transient());
    }
}
