//! Entity store backed by SQLite.
//!
//! `Database` wraps one rusqlite connection. Each worker opens its own
//! handle via [`Database::reopen`], so workers never share a connection;
//! coordination between them happens in SQLite (WAL mode, immediate
//! transactions, unique constraints).

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, TransactionBehavior};

pub mod entity_repo;
pub mod error;
pub mod migrations;
pub mod report_repo;
pub mod task_repo;

pub use error::DatabaseError;

const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Database handle wrapping a single rusqlite connection.
///
/// Cloning shares the connection. Use [`Database::reopen`] to get an
/// independent connection to the same file.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
    busy_timeout: Duration,
}

impl Database {
    /// Opens (or creates) the database at the given path and runs all
    /// pending migrations.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        Self::open_with_timeout(path, DEFAULT_BUSY_TIMEOUT)
    }

    /// Same as [`Database::open`] with an explicit busy timeout.
    pub fn open_with_timeout(path: &Path, busy_timeout: Duration) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| DatabaseError::Io {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
            }
        }

        let conn = Self::connect(path, busy_timeout)?;
        migrations::run_all(&conn)?;

        log::info!("Database opened at {}", path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: Some(path.to_path_buf()),
            busy_timeout,
        })
    }

    /// Opens an in-memory database for testing. Runs all migrations.
    ///
    /// In-memory databases cannot be reopened; [`Database::reopen`] returns
    /// a clone sharing the same connection.
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        migrations::run_all(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: None,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        })
    }

    fn connect(path: &Path, busy_timeout: Duration) -> Result<Connection, DatabaseError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        Ok(conn)
    }

    /// Opens a fresh connection to the same database file.
    pub fn reopen(&self) -> Result<Self, DatabaseError> {
        match &self.path {
            Some(path) => Ok(Self {
                conn: Arc::new(Mutex::new(Self::connect(path, self.busy_timeout)?)),
                path: Some(path.clone()),
                busy_timeout: self.busy_timeout,
            }),
            None => Ok(self.clone()),
        }
    }

    /// File backing this database, `None` for in-memory databases.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Provides locked access to the underlying connection.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Connection) -> Result<T, DatabaseError>,
    {
        let conn = self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        f(&conn)
    }

    /// Runs `f` inside an immediate transaction.
    ///
    /// The write lock is taken up front, so a read-check-write sequence in
    /// `f` is atomic with respect to other connections. Returning an error
    /// from `f` rolls the transaction back.
    pub fn with_transaction<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Connection) -> Result<T, DatabaseError>,
    {
        let mut conn = self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Highest applied migration version.
    pub fn schema_version(&self) -> Result<u32, DatabaseError> {
        self.with_conn(migrations::schema_version)
    }

    /// Cheap liveness probe.
    pub fn ping(&self) -> Result<(), DatabaseError> {
        self.with_conn(|conn| {
            conn.query_row("SELECT 1", [], |r| r.get::<_, i64>(0))?;
            Ok(())
        })
    }
}

/// Returns the canonical database path: `~/.datatask/data/datatask.db`.
pub fn default_database_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".datatask").join("data").join("datatask.db"))
}

pub(crate) fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn parse_timestamp(
    column: &'static str,
    value: &str,
) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DatabaseError::CorruptValue {
            column,
            reason: format!("'{}': {}", value, e),
        })
}
