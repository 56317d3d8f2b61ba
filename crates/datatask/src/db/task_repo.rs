//! Task repository: creation, lookup and status transitions for the `task`
//! table.
//!
//! Status changes are compare-and-set operations inside an immediate
//! transaction, so two workers racing on the same task cannot both move it
//! forward from the same state.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use serde_json::Value;

use super::{format_timestamp, parse_timestamp, Database, DatabaseError};
use crate::task::{TaskOutcome, TaskStatus, TaskType};

const SELECT_TASK: &str = "SELECT t.id, t.name, tt.name AS type_name, ts.name AS status_name,
        t.config, t.start_at, t.end_at, t.created_at, t.updated_at
     FROM task t
     JOIN task_type tt ON tt.id = t.type_id
     JOIN task_status ts ON ts.id = t.status_id";

/// A task row with reference ids resolved.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskRow {
    pub id: i64,
    pub name: String,
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub config: Value,
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Column values exactly as stored.
struct RawTaskRow {
    id: i64,
    name: String,
    type_name: String,
    status_name: String,
    config: String,
    start_at: Option<String>,
    end_at: Option<String>,
    created_at: String,
    updated_at: String,
}

impl RawTaskRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
            type_name: row.get("type_name")?,
            status_name: row.get("status_name")?,
            config: row.get("config")?,
            start_at: row.get("start_at")?,
            end_at: row.get("end_at")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    fn into_task(self) -> Result<TaskRow, DatabaseError> {
        let corrupt = |column: &'static str, reason: String| DatabaseError::CorruptValue {
            column,
            reason,
        };
        Ok(TaskRow {
            id: self.id,
            name: self.name,
            task_type: self
                .type_name
                .parse()
                .map_err(|e: crate::task::ParseError| corrupt("type_id", e.to_string()))?,
            status: self
                .status_name
                .parse()
                .map_err(|e: crate::task::ParseError| corrupt("status_id", e.to_string()))?,
            config: serde_json::from_str(&self.config)?,
            start_at: self
                .start_at
                .map(|s| parse_timestamp("start_at", &s))
                .transpose()?,
            end_at: self
                .end_at
                .map(|s| parse_timestamp("end_at", &s))
                .transpose()?,
            created_at: parse_timestamp("created_at", &self.created_at)?,
            updated_at: parse_timestamp("updated_at", &self.updated_at)?,
        })
    }
}

/// Identity of a freshly created task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreatedTask {
    pub id: i64,
    pub name: String,
}

/// Result of a compare-and-set status change.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusUpdate {
    Applied(TaskRow),
    /// The stored status does not allow the requested transition.
    Rejected { current: TaskStatus },
}

/// Query filter parameters for task listing.
#[derive(Debug, Default, Clone)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub task_type: Option<TaskType>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

fn lookup_id(
    conn: &Connection,
    table: &'static str,
    name: &str,
) -> Result<i64, DatabaseError> {
    let sql = format!("SELECT id FROM {} WHERE name = ?1", table);
    conn.query_row(&sql, params![name], |r| r.get(0))
        .optional()?
        .ok_or_else(|| DatabaseError::MissingReference {
            table,
            name: name.to_string(),
        })
}

/// Resolves the reference id for a task type.
pub fn lookup_type_id(db: &Database, task_type: TaskType) -> Result<i64, DatabaseError> {
    db.with_conn(|conn| lookup_id(conn, "task_type", task_type.as_str()))
}

/// Resolves the reference id for a task status.
pub fn lookup_status_id(db: &Database, status: TaskStatus) -> Result<i64, DatabaseError> {
    db.with_conn(|conn| lookup_id(conn, "task_status", status.as_str()))
}

/// Creates a PENDING task with a generated unique name (`<TYPE>-<uuid>`).
pub fn create_task(db: &Database, task_type: TaskType) -> Result<CreatedTask, DatabaseError> {
    let name = format!("{}-{}", task_type, uuid::Uuid::new_v4());
    let now = format_timestamp(Utc::now());

    db.with_transaction(|conn| {
        let type_id = lookup_id(conn, "task_type", task_type.as_str())?;
        let status_id = lookup_id(conn, "task_status", TaskStatus::Pending.as_str())?;

        conn.execute(
            "INSERT INTO task (name, type_id, status_id, config, created_at, updated_at)
             VALUES (?1, ?2, ?3, '{}', ?4, ?4)",
            params![name, type_id, status_id, now],
        )?;

        Ok(CreatedTask {
            id: conn.last_insert_rowid(),
            name: name.clone(),
        })
    })
}

fn find_in(conn: &Connection, id: i64) -> Result<Option<TaskRow>, DatabaseError> {
    let sql = format!("{} WHERE t.id = ?1", SELECT_TASK);
    conn.query_row(&sql, params![id], RawTaskRow::from_row)
        .optional()?
        .map(RawTaskRow::into_task)
        .transpose()
}

/// Finds a task by its ID.
pub fn find_by_id(db: &Database, id: i64) -> Result<Option<TaskRow>, DatabaseError> {
    db.with_conn(|conn| find_in(conn, id))
}

/// Like [`find_by_id`] but a missing task is an error.
pub fn get_task(db: &Database, id: i64) -> Result<TaskRow, DatabaseError> {
    find_by_id(db, id)?.ok_or(DatabaseError::NotFound { entity: "task", id })
}

/// Moves a task to `status`, merging `outcome` into its config.
///
/// Entering IN_PROGRESS stamps `start_at`; entering a terminal status stamps
/// `end_at`. A transition the stored status does not allow is rejected
/// without writing anything.
pub fn update_status(
    db: &Database,
    id: i64,
    status: TaskStatus,
    outcome: Option<&TaskOutcome>,
) -> Result<StatusUpdate, DatabaseError> {
    db.with_transaction(|conn| {
        let current = find_in(conn, id)?.ok_or(DatabaseError::NotFound { entity: "task", id })?;

        if !current.status.can_transition_to(status) {
            return Ok(StatusUpdate::Rejected {
                current: current.status,
            });
        }

        let mut config = current.config.clone();
        if let Some(outcome) = outcome {
            outcome.merge_into(&mut config);
        }

        let now = format_timestamp(Utc::now());
        let status_id = lookup_id(conn, "task_status", status.as_str())?;
        let config_text = serde_json::to_string(&config)?;

        match status {
            TaskStatus::InProgress => conn.execute(
                "UPDATE task SET status_id = ?2, config = ?3, start_at = ?4, updated_at = ?4
                 WHERE id = ?1",
                params![id, status_id, config_text, now],
            )?,
            _ if status.is_terminal() => conn.execute(
                "UPDATE task SET status_id = ?2, config = ?3, end_at = ?4, updated_at = ?4
                 WHERE id = ?1",
                params![id, status_id, config_text, now],
            )?,
            _ => conn.execute(
                "UPDATE task SET status_id = ?2, config = ?3, updated_at = ?4 WHERE id = ?1",
                params![id, status_id, config_text, now],
            )?,
        };

        let updated = find_in(conn, id)?.ok_or(DatabaseError::NotFound { entity: "task", id })?;
        Ok(StatusUpdate::Applied(updated))
    })
}

/// Re-claims an IN_PROGRESS task whose `start_at` is older than `cutoff`.
///
/// Restamps `start_at` so only one caller wins. Returns the refreshed row
/// when the claim succeeded.
pub fn reclaim_stale(
    db: &Database,
    id: i64,
    cutoff: DateTime<Utc>,
) -> Result<Option<TaskRow>, DatabaseError> {
    db.with_transaction(|conn| {
        let Some(current) = find_in(conn, id)? else {
            return Ok(None);
        };
        let is_stale = current.status == TaskStatus::InProgress
            && current.start_at.map_or(true, |started| started < cutoff);
        if !is_stale {
            return Ok(None);
        }

        let now = format_timestamp(Utc::now());
        conn.execute(
            "UPDATE task SET start_at = ?2, updated_at = ?2 WHERE id = ?1",
            params![id, now],
        )?;
        find_in(conn, id)
    })
}

/// Lists tasks with filters, newest first, returning (rows, total_count).
pub fn list(db: &Database, filter: &TaskFilter) -> Result<(Vec<TaskRow>, u64), DatabaseError> {
    db.with_conn(|conn| {
        let mut conditions = Vec::new();
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(status) = filter.status {
            conditions.push(format!("ts.name = ?{}", param_values.len() + 1));
            param_values.push(Box::new(status.as_str()));
        }
        if let Some(task_type) = filter.task_type {
            conditions.push(format!("tt.name = ?{}", param_values.len() + 1));
            param_values.push(Box::new(task_type.as_str()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let count_sql = format!(
            "SELECT COUNT(*) FROM task t
             JOIN task_type tt ON tt.id = t.type_id
             JOIN task_status ts ON ts.id = t.status_id {}",
            where_clause
        );
        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let total: u64 = conn.query_row(&count_sql, params_ref.as_slice(), |r| r.get(0))?;

        let limit = filter.limit.unwrap_or(100) as i64;
        let offset = filter.offset.unwrap_or(0) as i64;
        param_values.push(Box::new(limit));
        param_values.push(Box::new(offset));
        let query_sql = format!(
            "{} {} ORDER BY t.id DESC LIMIT ?{} OFFSET ?{}",
            SELECT_TASK,
            where_clause,
            param_values.len() - 1,
            param_values.len()
        );

        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&query_sql)?;
        let raw: Vec<RawTaskRow> = stmt
            .query_map(params_ref.as_slice(), RawTaskRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        let rows = raw
            .into_iter()
            .map(RawTaskRow::into_task)
            .collect::<Result<Vec<_>, _>>()?;

        Ok((rows, total))
    })
}

/// Counts tasks per status. Statuses with no tasks are omitted.
pub fn count_by_status(db: &Database) -> Result<HashMap<TaskStatus, u64>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT ts.name, COUNT(*) FROM task t
             JOIN task_status ts ON ts.id = t.status_id
             GROUP BY ts.name",
        )?;
        let pairs = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, u64>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut counts = HashMap::new();
        for (name, count) in pairs {
            let status: TaskStatus = name.parse().map_err(|e: crate::task::ParseError| {
                DatabaseError::CorruptValue {
                    column: "status_id",
                    reason: e.to_string(),
                }
            })?;
            counts.insert(status, count);
        }
        Ok(counts)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_db() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn applied(update: StatusUpdate) -> TaskRow {
        match update {
            StatusUpdate::Applied(row) => row,
            StatusUpdate::Rejected { current } => panic!("transition rejected from {}", current),
        }
    }

    #[test]
    fn test_create_task_is_pending() {
        let db = test_db();
        let created = create_task(&db, TaskType::Load).unwrap();
        assert!(created.name.starts_with("LOAD-"));

        let task = get_task(&db, created.id).unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.task_type, TaskType::Load);
        assert_eq!(task.config, json!({}));
        assert!(task.start_at.is_none());
        assert!(task.end_at.is_none());
    }

    #[test]
    fn test_task_names_are_unique() {
        let db = test_db();
        let a = create_task(&db, TaskType::Backup).unwrap();
        let b = create_task(&db, TaskType::Backup).unwrap();
        assert_ne!(a.name, b.name);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_find_missing_task() {
        let db = test_db();
        assert!(find_by_id(&db, 99).unwrap().is_none());
        assert!(matches!(
            get_task(&db, 99),
            Err(DatabaseError::NotFound { entity: "task", id: 99 })
        ));
    }

    #[test]
    fn test_lookup_reference_ids() {
        let db = test_db();
        assert_eq!(lookup_type_id(&db, TaskType::Report).unwrap(), 4);
        assert_eq!(lookup_status_id(&db, TaskStatus::InProgress).unwrap(), 2);
    }

    #[test]
    fn test_full_lifecycle_stamps_times() {
        let db = test_db();
        let created = create_task(&db, TaskType::Report).unwrap();

        let running = applied(update_status(&db, created.id, TaskStatus::InProgress, None).unwrap());
        assert_eq!(running.status, TaskStatus::InProgress);
        assert!(running.start_at.is_some());
        assert!(running.end_at.is_none());

        let outcome = TaskOutcome::Result(json!({"url": "http://x"}));
        let done = applied(
            update_status(&db, created.id, TaskStatus::Completed, Some(&outcome)).unwrap(),
        );
        assert_eq!(done.status, TaskStatus::Completed);
        assert_eq!(done.config, json!({"result": {"url": "http://x"}}));
        assert!(done.end_at.is_some());
        assert_eq!(done.start_at, running.start_at);
    }

    #[test]
    fn test_cannot_skip_in_progress() {
        let db = test_db();
        let created = create_task(&db, TaskType::Load).unwrap();
        let update = update_status(&db, created.id, TaskStatus::Completed, None).unwrap();
        assert_eq!(
            update,
            StatusUpdate::Rejected {
                current: TaskStatus::Pending
            }
        );
        assert_eq!(get_task(&db, created.id).unwrap().status, TaskStatus::Pending);
    }

    #[test]
    fn test_terminal_task_is_not_rewritten() {
        let db = test_db();
        let created = create_task(&db, TaskType::Restore).unwrap();
        applied(update_status(&db, created.id, TaskStatus::InProgress, None).unwrap());
        let failed = TaskOutcome::Error("missing".into());
        let before =
            applied(update_status(&db, created.id, TaskStatus::Failed, Some(&failed)).unwrap());

        let retry = update_status(&db, created.id, TaskStatus::InProgress, None).unwrap();
        assert_eq!(
            retry,
            StatusUpdate::Rejected {
                current: TaskStatus::Failed
            }
        );
        let after = get_task(&db, created.id).unwrap();
        assert_eq!(after.config, before.config);
        assert_eq!(after.end_at, before.end_at);
    }

    #[test]
    fn test_second_claim_is_rejected() {
        let db = test_db();
        let created = create_task(&db, TaskType::Backup).unwrap();
        applied(update_status(&db, created.id, TaskStatus::InProgress, None).unwrap());
        assert_eq!(
            update_status(&db, created.id, TaskStatus::InProgress, None).unwrap(),
            StatusUpdate::Rejected {
                current: TaskStatus::InProgress
            }
        );
    }

    #[test]
    fn test_reclaim_only_stale_in_progress() {
        let db = test_db();
        let created = create_task(&db, TaskType::Backup).unwrap();

        // Pending tasks are never reclaimed.
        assert!(reclaim_stale(&db, created.id, Utc::now()).unwrap().is_none());

        let running = applied(update_status(&db, created.id, TaskStatus::InProgress, None).unwrap());
        let started = running.start_at.unwrap();

        let too_early = started - chrono::Duration::seconds(60);
        assert!(reclaim_stale(&db, created.id, too_early).unwrap().is_none());

        let later = started + chrono::Duration::seconds(1);
        let reclaimed = reclaim_stale(&db, created.id, later).unwrap().unwrap();
        assert_eq!(reclaimed.status, TaskStatus::InProgress);
        assert!(reclaimed.start_at.unwrap() >= started);
    }

    #[test]
    fn test_list_and_count() {
        let db = test_db();
        let a = create_task(&db, TaskType::Load).unwrap();
        create_task(&db, TaskType::Load).unwrap();
        create_task(&db, TaskType::Report).unwrap();
        applied(update_status(&db, a.id, TaskStatus::InProgress, None).unwrap());

        let (rows, total) = list(
            &db,
            &TaskFilter {
                task_type: Some(TaskType::Load),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(total, 2);
        assert_eq!(rows.len(), 2);
        assert!(rows[0].id > rows[1].id);

        let (rows, total) = list(
            &db,
            &TaskFilter {
                status: Some(TaskStatus::Pending),
                limit: Some(1),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(total, 2);
        assert_eq!(rows.len(), 1);

        let counts = count_by_status(&db).unwrap();
        assert_eq!(counts.get(&TaskStatus::Pending), Some(&2));
        assert_eq!(counts.get(&TaskStatus::InProgress), Some(&1));
        assert_eq!(counts.get(&TaskStatus::Completed), None);
    }
}
