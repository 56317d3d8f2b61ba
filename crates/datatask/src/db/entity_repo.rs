//! Business entity tables: department, job and employee.
//!
//! Uploads arrive as raw JSON rows. Each kind validates its own rows into a
//! typed record; invalid rows are reported back to the caller instead of
//! failing the batch. Inserts run per kind inside one transaction, with
//! primary-key duplicates skipped so a redelivered upload is harmless.

use std::fmt;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection};
use serde::Serialize;
use serde_json::Value;

use super::error::is_unique_violation;
use super::{Database, DatabaseError};
use crate::task::Table;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Department {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Job {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Employee {
    pub id: i64,
    pub name: String,
    pub hired_at: DateTime<Utc>,
    pub department_id: i64,
    pub job_id: i64,
}

/// Why a single upload row was rejected. `row` is 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowError {
    pub row: usize,
    pub reason: String,
}

impl fmt::Display for RowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "row {} {}", self.row, self.reason)
    }
}

/// Outcome of inserting one kind of records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InsertSummary {
    pub inserted: usize,
    pub duplicates: usize,
}

/// A typed row of one of the business tables.
pub trait EntityRecord: Sized {
    const TABLE: Table;

    /// Validates a raw upload row. Every required field must be present and
    /// non-null.
    fn from_value(value: &Value) -> Result<Self, String>;

    fn insert(&self, conn: &Connection, task_id: i64) -> Result<usize, rusqlite::Error>;
}

/// Reads the first of `keys` that is present and non-null.
fn field<'a>(value: &'a Value, keys: &[&'static str]) -> Result<&'a Value, String> {
    keys.iter()
        .filter_map(|k| value.get(*k))
        .find(|v| !v.is_null())
        .ok_or_else(|| format!("missing {}", keys[0]))
}

fn int_field(value: &Value, keys: &[&'static str]) -> Result<i64, String> {
    let raw = field(value, keys)?;
    match raw {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .ok_or_else(|| format!("invalid {}: {}", keys[0], raw))
}

fn text_field(value: &Value, keys: &[&'static str]) -> Result<String, String> {
    match field(value, keys)? {
        Value::String(s) if !s.trim().is_empty() => Ok(s.clone()),
        Value::String(_) => Err(format!("missing {}", keys[0])),
        other => Err(format!("invalid {}: {}", keys[0], other)),
    }
}

/// Accepts RFC 3339 or a naive `YYYY-MM-DDTHH:MM:SS`, the latter as UTC.
fn timestamp_field(value: &Value, keys: &[&'static str]) -> Result<DateTime<Utc>, String> {
    let raw = text_field(value, keys)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S").map(|n| n.and_utc())
        })
        .map_err(|_| format!("invalid {}: {}", keys[0], raw))
}

impl EntityRecord for Department {
    const TABLE: Table = Table::Department;

    fn from_value(value: &Value) -> Result<Self, String> {
        Ok(Self {
            id: int_field(value, &["id"])?,
            name: text_field(value, &["department", "name"])?,
        })
    }

    fn insert(&self, conn: &Connection, task_id: i64) -> Result<usize, rusqlite::Error> {
        conn.execute(
            "INSERT INTO department (id, name, created_by_task_id) VALUES (?1, ?2, ?3)",
            params![self.id, self.name, task_id],
        )
    }
}

impl EntityRecord for Job {
    const TABLE: Table = Table::Job;

    fn from_value(value: &Value) -> Result<Self, String> {
        Ok(Self {
            id: int_field(value, &["id"])?,
            name: text_field(value, &["job", "name"])?,
        })
    }

    fn insert(&self, conn: &Connection, task_id: i64) -> Result<usize, rusqlite::Error> {
        conn.execute(
            "INSERT INTO job (id, name, created_by_task_id) VALUES (?1, ?2, ?3)",
            params![self.id, self.name, task_id],
        )
    }
}

impl EntityRecord for Employee {
    const TABLE: Table = Table::Employee;

    fn from_value(value: &Value) -> Result<Self, String> {
        Ok(Self {
            id: int_field(value, &["id"])?,
            name: text_field(value, &["name"])?,
            hired_at: timestamp_field(value, &["datetime", "hired_at"])?,
            department_id: int_field(value, &["department_id"])?,
            job_id: int_field(value, &["job_id"])?,
        })
    }

    fn insert(&self, conn: &Connection, task_id: i64) -> Result<usize, rusqlite::Error> {
        conn.execute(
            "INSERT INTO employee (id, name, hired_at, department_id, job_id, created_by_task_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                self.id,
                self.name,
                self.hired_at.to_rfc3339_opts(SecondsFormat::Secs, true),
                self.department_id,
                self.job_id,
                task_id
            ],
        )
    }
}

/// Splits raw rows into valid records and per-row errors.
pub fn partition_rows<T: EntityRecord>(rows: &[Value]) -> (Vec<T>, Vec<RowError>) {
    let mut valid = Vec::with_capacity(rows.len());
    let mut invalid = Vec::new();
    for (index, row) in rows.iter().enumerate() {
        match T::from_value(row) {
            Ok(record) => valid.push(record),
            Err(reason) => invalid.push(RowError {
                row: index + 1,
                reason,
            }),
        }
    }
    (valid, invalid)
}

/// Inserts records tagged with `task_id` in a single transaction.
///
/// Primary-key duplicates are skipped and counted. Any other constraint
/// failure rolls back the whole kind and is returned.
pub fn insert_records<T: EntityRecord>(
    db: &Database,
    records: &[T],
    task_id: i64,
) -> Result<InsertSummary, DatabaseError> {
    let summary = db.with_transaction(|conn| {
        let mut summary = InsertSummary::default();
        for record in records {
            match record.insert(conn, task_id) {
                Ok(_) => summary.inserted += 1,
                Err(e) if is_unique_violation(&e) => summary.duplicates += 1,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(summary)
    })?;

    if summary.duplicates > 0 {
        log::warn!(
            "Cannot insert duplicate data: skipped {} existing {} row(s)",
            summary.duplicates,
            T::TABLE
        );
    }
    Ok(summary)
}

/// Storage class of a column, used by the backup encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Integer,
    Text,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: &'static str,
    pub kind: ColumnKind,
}

const fn col(name: &'static str, kind: ColumnKind) -> ColumnDef {
    ColumnDef { name, kind }
}

const DEPARTMENT_COLUMNS: &[ColumnDef] = &[
    col("id", ColumnKind::Integer),
    col("name", ColumnKind::Text),
    col("created_by_task_id", ColumnKind::Integer),
    col("created_at", ColumnKind::Text),
    col("updated_at", ColumnKind::Text),
];

const JOB_COLUMNS: &[ColumnDef] = DEPARTMENT_COLUMNS;

const EMPLOYEE_COLUMNS: &[ColumnDef] = &[
    col("id", ColumnKind::Integer),
    col("name", ColumnKind::Text),
    col("hired_at", ColumnKind::Text),
    col("department_id", ColumnKind::Integer),
    col("job_id", ColumnKind::Integer),
    col("created_by_task_id", ColumnKind::Integer),
    col("created_at", ColumnKind::Text),
    col("updated_at", ColumnKind::Text),
];

/// Column layout of a business table.
pub fn columns(table: Table) -> &'static [ColumnDef] {
    match table {
        Table::Department => DEPARTMENT_COLUMNS,
        Table::Job => JOB_COLUMNS,
        Table::Employee => EMPLOYEE_COLUMNS,
    }
}

/// Full contents of a table, row-major, in [`columns`] order.
#[derive(Debug, Clone, PartialEq)]
pub struct TableData {
    pub table: Table,
    pub rows: Vec<Vec<SqlValue>>,
}

fn column_list(table: Table) -> String {
    columns(table)
        .iter()
        .map(|c| c.name)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Reads every row of `table` ordered by id.
pub fn fetch_table(db: &Database, table: Table) -> Result<TableData, DatabaseError> {
    let width = columns(table).len();
    let sql = format!(
        "SELECT {} FROM {} ORDER BY id",
        column_list(table),
        table.as_str()
    );
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], |row| {
                (0..width)
                    .map(|i| row.get::<_, SqlValue>(i))
                    .collect::<Result<Vec<_>, _>>()
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(TableData { table, rows })
    })
}

/// Inserts previously fetched rows verbatim, all or nothing.
///
/// Rows are not deduplicated; an id that already exists fails the whole
/// insert.
pub fn insert_table(db: &Database, data: &TableData) -> Result<usize, DatabaseError> {
    let width = columns(data.table).len();
    let placeholders = (1..=width)
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        data.table.as_str(),
        column_list(data.table),
        placeholders
    );

    db.with_transaction(|conn| {
        let mut stmt = conn.prepare(&sql)?;
        for row in &data.rows {
            if row.len() != width {
                return Err(DatabaseError::CorruptValue {
                    column: "row",
                    reason: format!("expected {} values, got {}", width, row.len()),
                });
            }
            stmt.execute(params_from_iter(row.iter()))?;
        }
        Ok(data.rows.len())
    })
}

/// Number of rows in `table`.
pub fn count(db: &Database, table: Table) -> Result<u64, DatabaseError> {
    let sql = format!("SELECT COUNT(*) FROM {}", table.as_str());
    db.with_conn(|conn| Ok(conn.query_row(&sql, [], |r| r.get(0))?))
}

/// Sorted `name` column of `table`.
pub fn names(db: &Database, table: Table) -> Result<Vec<String>, DatabaseError> {
    let sql = format!("SELECT name FROM {} ORDER BY name", table.as_str());
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(&sql)?;
        let names = stmt
            .query_map([], |r| r.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(names)
    })
}
