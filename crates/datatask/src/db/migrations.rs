//! Schema migrations.
//!
//! Scripts live in `sql/` and are embedded at build time. The `_migrations`
//! table records every applied version.

use rusqlite::{params, Connection};

use super::error::DatabaseError;

/// A single migration definition.
struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

/// All migrations in order. Each is applied at most once.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create_reference_tables",
        sql: include_str!("sql/001_create_reference_tables.sql"),
    },
    Migration {
        version: 2,
        description: "create_task_table",
        sql: include_str!("sql/002_create_task.sql"),
    },
    Migration {
        version: 3,
        description: "create_entity_tables",
        sql: include_str!("sql/003_create_entities.sql"),
    },
    Migration {
        version: 4,
        description: "create_queue_tables",
        sql: include_str!("sql/004_create_queue.sql"),
    },
];

const TRACKING_TABLE: &str = "CREATE TABLE IF NOT EXISTS _migrations (
    version INTEGER PRIMARY KEY,
    description TEXT NOT NULL,
    applied_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
);";

/// Latest schema version this build knows about.
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map_or(0, |m| m.version)
}

/// Highest applied version, 0 for an empty database.
pub fn schema_version(conn: &Connection) -> Result<u32, DatabaseError> {
    conn.execute_batch(TRACKING_TABLE)?;
    Ok(conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |r| r.get(0),
    )?)
}

/// Brings the schema up to [`latest_version`].
pub fn run_all(conn: &Connection) -> Result<(), DatabaseError> {
    let applied = schema_version(conn)?;
    if applied > latest_version() {
        return Err(DatabaseError::Migration {
            version: applied,
            reason: format!(
                "database schema is newer than this build (v{})",
                latest_version()
            ),
        });
    }

    for migration in MIGRATIONS.iter().filter(|m| m.version > applied) {
        apply(conn, migration)?;
    }
    Ok(())
}

/// Runs one script and records it in the same transaction, so a failing
/// script leaves neither a partial schema nor a version row behind.
fn apply(conn: &Connection, migration: &Migration) -> Result<(), DatabaseError> {
    let failed = |e: rusqlite::Error| DatabaseError::Migration {
        version: migration.version,
        reason: e.to_string(),
    };

    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(migration.sql).map_err(failed)?;
    tx.execute(
        "INSERT INTO _migrations (version, description) VALUES (?1, ?2)",
        params![migration.version, migration.description],
    )?;
    tx.commit()?;

    log::info!(
        "Applied migration v{} ({})",
        migration.version,
        migration.description
    );
    Ok(())
}
