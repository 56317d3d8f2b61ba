use thiserror::Error;

use super::types::{Table, TaskType};
use crate::db::DatabaseError;

/// Failures a handler reports back to the executor. The `Display` text is
/// what gets stored under `config.error`.
#[derive(Error, Debug)]
pub enum TaskError {
    #[error("Invalid {task} payload: {reason}")]
    InvalidPayload { task: TaskType, reason: String },

    #[error("Task type {0} has no handler")]
    UnsupportedTaskType(TaskType),

    #[error("Load into {table} failed: {source}")]
    LoadFailed {
        table: Table,
        #[source]
        source: DatabaseError,
    },

    #[error("Backup for {table} failed: {reason}")]
    BackupFailed { table: Table, reason: String },

    #[error("Restore failed: data not found for {table} at '{key}'")]
    BackupNotFound { table: Table, key: String },

    #[error("Restore for {table} failed: {reason}")]
    RestoreFailed { table: Table, reason: String },

    #[error("Failed to upload report: {0}")]
    ReportUploadFailed(String),

    #[error("Failed to generate pre-signed URL: {0}")]
    ReportUrlFailed(String),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Failed to render report: {0}")]
    ReportRenderFailed(String),

    #[error("Corrupt backup: {0}")]
    Codec(String),

    #[error("Handler panicked: {0}")]
    Panicked(String),
}
