use serde_json::{Map, Value};

use super::error::TaskError;
use super::types::TaskStatus;

pub const RESULT_KEY: &str = "result";
pub const ERROR_KEY: &str = "error";

/// Terminal result of executing a task, as stored in the task's `config`.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Result(Value),
    Error(String),
}

impl TaskOutcome {
    pub fn status(&self) -> TaskStatus {
        match self {
            TaskOutcome::Result(_) => TaskStatus::Completed,
            TaskOutcome::Error(_) => TaskStatus::Failed,
        }
    }

    /// Replaces or inserts the `result`/`error` key, leaving every other key
    /// untouched. A non-object config is replaced by an object.
    pub fn merge_into(&self, config: &mut Value) {
        if !config.is_object() {
            *config = Value::Object(Map::new());
        }
        if let Value::Object(map) = config {
            match self {
                TaskOutcome::Result(value) => {
                    map.insert(RESULT_KEY.to_string(), value.clone());
                }
                TaskOutcome::Error(message) => {
                    map.insert(ERROR_KEY.to_string(), Value::String(message.clone()));
                }
            }
        }
    }
}

impl From<Result<Value, TaskError>> for TaskOutcome {
    fn from(result: Result<Value, TaskError>) -> Self {
        match result {
            Ok(value) => TaskOutcome::Result(value),
            Err(e) => TaskOutcome::Error(e.to_string()),
        }
    }
}
