//! Routes a task payload to its handler.

use serde_json::Value;

use crate::handlers::{backup, load, report, restore, HandlerContext};
use crate::task::{TaskError, TaskPayload};

/// Runs the handler for `payload`. The match is exhaustive over every
/// executable task type, so adding a payload variant without a handler does
/// not compile.
pub fn dispatch(
    payload: &TaskPayload,
    ctx: &HandlerContext<'_>,
    task_id: i64,
) -> Result<Value, TaskError> {
    match payload {
        TaskPayload::Load(upload) => load::run(upload, ctx, task_id),
        TaskPayload::Backup(table) => backup::run(table, ctx),
        TaskPayload::Restore(table) => restore::run(table, ctx),
        TaskPayload::Report(report) => report::run(report, ctx),
    }
}
