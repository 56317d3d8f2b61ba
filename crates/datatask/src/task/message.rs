//! Wire envelope exchanged between the submitting side and the workers.
//!
//! The envelope carries its own `version` so it can evolve independently of
//! the task table and the handler payload types. Messages without a version
//! are treated as version 1.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::error::TaskError;
use super::types::{ReportType, Table, TaskType};

pub const MESSAGE_VERSION: u32 = 1;

/// Maximum number of rows a single upload may carry across all entity kinds.
pub const MAX_UPLOAD_ROWS: usize = 1000;

#[derive(Error, Debug)]
pub enum MessageError {
    #[error("Malformed task message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Unsupported task message version {0}")]
    UnsupportedVersion(u32),
}

fn default_version() -> u32 {
    MESSAGE_VERSION
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMessage {
    #[serde(default = "default_version")]
    pub version: u32,
    pub task_id: i64,
    pub task: TaskType,
    #[serde(default)]
    pub data: Option<Value>,
}

impl TaskMessage {
    pub fn new(task_id: i64, payload: &TaskPayload) -> Self {
        Self {
            version: MESSAGE_VERSION,
            task_id,
            task: payload.task_type(),
            data: Some(payload.to_data()),
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, MessageError> {
        let message: TaskMessage = serde_json::from_slice(bytes)?;
        if message.version != MESSAGE_VERSION {
            return Err(MessageError::UnsupportedVersion(message.version));
        }
        Ok(message)
    }

    pub fn encode(&self) -> Result<Vec<u8>, MessageError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Interprets `data` according to the task type.
    pub fn payload(&self) -> Result<TaskPayload, TaskError> {
        TaskPayload::from_parts(self.task, self.data.clone())
    }
}

/// Bulk rows for the three entity kinds. Rows stay raw JSON until the load
/// handler validates them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UploadPayload {
    #[serde(default)]
    pub departments: Vec<Value>,
    #[serde(default)]
    pub jobs: Vec<Value>,
    #[serde(default)]
    pub employees: Vec<Value>,
}

impl UploadPayload {
    pub fn total_rows(&self) -> usize {
        self.departments.len() + self.jobs.len() + self.employees.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total_rows() == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TablePayload {
    pub table_name: Table,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportPayload {
    pub report_type: ReportType,
}

/// Work description for each executable task type.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskPayload {
    Load(UploadPayload),
    Backup(TablePayload),
    Restore(TablePayload),
    Report(ReportPayload),
}

impl TaskPayload {
    pub fn from_parts(task: TaskType, data: Option<Value>) -> Result<Self, TaskError> {
        fn parse<T: serde::de::DeserializeOwned>(
            task: TaskType,
            data: Option<Value>,
        ) -> Result<T, TaskError> {
            let data = data.ok_or_else(|| TaskError::InvalidPayload {
                task,
                reason: "no data provided".to_string(),
            })?;
            serde_json::from_value(data).map_err(|e| TaskError::InvalidPayload {
                task,
                reason: e.to_string(),
            })
        }

        match task {
            TaskType::Load => parse(task, data).map(TaskPayload::Load),
            TaskType::Backup => parse(task, data).map(TaskPayload::Backup),
            TaskType::Restore => parse(task, data).map(TaskPayload::Restore),
            TaskType::Report => parse(task, data).map(TaskPayload::Report),
            TaskType::Migration => Err(TaskError::UnsupportedTaskType(task)),
        }
    }

    pub fn task_type(&self) -> TaskType {
        match self {
            TaskPayload::Load(_) => TaskType::Load,
            TaskPayload::Backup(_) => TaskType::Backup,
            TaskPayload::Restore(_) => TaskType::Restore,
            TaskPayload::Report(_) => TaskType::Report,
        }
    }

    pub fn to_data(&self) -> Value {
        let value = match self {
            TaskPayload::Load(p) => serde_json::to_value(p),
            TaskPayload::Backup(p) | TaskPayload::Restore(p) => serde_json::to_value(p),
            TaskPayload::Report(p) => serde_json::to_value(p),
        };
        value.unwrap_or(Value::Null)
    }
}
