//! LOAD: validated bulk insert of departments, jobs and employees.
//!
//! Kinds are processed in dependency order. Invalid rows become a warning
//! on the result; duplicate ids are skipped. Any other insert failure fails
//! the task, leaving kinds that were already committed in place.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::HandlerContext;
use crate::db::entity_repo::{
    self, Department, Employee, EntityRecord, InsertSummary, Job, RowError,
};
use crate::task::{Table, TaskError, UploadPayload};

pub const LOAD_SUCCESS: &str = "Data loaded successfully";

/// Per-kind counts reported in the task result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct KindSummary {
    pub inserted: usize,
    pub duplicates: usize,
    pub invalid: usize,
}

pub fn run(
    payload: &UploadPayload,
    ctx: &HandlerContext<'_>,
    task_id: i64,
) -> Result<Value, TaskError> {
    let mut report = LoadReport::default();
    report.absorb(load_kind::<Department>(ctx, &payload.departments, task_id)?);
    report.absorb(load_kind::<Job>(ctx, &payload.jobs, task_id)?);
    report.absorb(load_kind::<Employee>(ctx, &payload.employees, task_id)?);

    let warning = if report.warnings.is_empty() {
        None
    } else {
        Some(report.warnings.join("; "))
    };
    Ok(json!({
        "message": LOAD_SUCCESS,
        "warning": warning,
        "tables": report.tables,
    }))
}

#[derive(Default)]
struct LoadReport {
    warnings: Vec<String>,
    tables: BTreeMap<String, KindSummary>,
}

impl LoadReport {
    fn absorb(&mut self, kind: Option<KindLoad>) {
        let Some(kind) = kind else {
            return;
        };
        if !kind.invalid.is_empty() {
            self.warnings.push(invalid_rows_warning(kind.table, &kind.invalid));
        }
        self.tables.insert(kind.table.as_str().to_string(), kind.summary);
    }
}

struct KindLoad {
    table: Table,
    summary: KindSummary,
    invalid: Vec<RowError>,
}

/// Validates and inserts one kind. `None` when the payload has no rows of it.
fn load_kind<T: EntityRecord>(
    ctx: &HandlerContext<'_>,
    rows: &[Value],
    task_id: i64,
) -> Result<Option<KindLoad>, TaskError> {
    if rows.is_empty() {
        return Ok(None);
    }

    let (valid, invalid) = entity_repo::partition_rows::<T>(rows);
    for error in &invalid {
        warn!(table = %T::TABLE, "Invalid {}: missing required fields", error);
    }

    let InsertSummary {
        inserted,
        duplicates,
    } = if valid.is_empty() {
        InsertSummary::default()
    } else {
        entity_repo::insert_records(ctx.db, &valid, task_id).map_err(|source| {
            TaskError::LoadFailed {
                table: T::TABLE,
                source,
            }
        })?
    };

    debug!(
        table = %T::TABLE,
        inserted,
        duplicates,
        invalid = invalid.len(),
        "Loaded rows"
    );

    Ok(Some(KindLoad {
        table: T::TABLE,
        summary: KindSummary {
            inserted,
            duplicates,
            invalid: invalid.len(),
        },
        invalid,
    }))
}

fn invalid_rows_warning(table: Table, invalid: &[RowError]) -> String {
    let rows = invalid
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    format!("Invalid rows found in {}: {}", table, rows)
}
