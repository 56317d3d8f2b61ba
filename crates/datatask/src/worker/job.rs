use std::fmt;
use std::time::Duration;

use crate::task::{TaskMessage, TaskType};

/// A decoded message handed to the pool.
#[derive(Debug, Clone)]
pub struct TaskJob {
    pub message: TaskMessage,
    /// Channel offset the message was delivered at, if it came from one.
    pub offset: Option<i64>,
}

impl TaskJob {
    pub fn new(message: TaskMessage) -> Self {
        Self {
            message,
            offset: None,
        }
    }

    pub fn from_delivery(message: TaskMessage, offset: i64) -> Self {
        Self {
            message,
            offset: Some(offset),
        }
    }

    pub fn task_id(&self) -> i64 {
        self.message.task_id
    }

    pub fn task_type(&self) -> TaskType {
        self.message.task
    }
}

/// Why a delivered task was not executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    AlreadyCompleted,
    AlreadyFailed,
    /// Another worker holds the task and its claim is not stale yet.
    ClaimedElsewhere,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::AlreadyCompleted => write!(f, "already completed"),
            SkipReason::AlreadyFailed => write!(f, "already failed"),
            SkipReason::ClaimedElsewhere => write!(f, "in progress elsewhere"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// Handler succeeded and the task is COMPLETED.
    Completed,
    /// Handler failed and the task is FAILED with this error.
    Failed(String),
    /// The handler was not invoked and the task was not touched.
    Skipped(SkipReason),
    /// The message could not be processed; the task is left as it was.
    Dropped(String),
    /// The store was busy or unreachable; the task is left as it was and a
    /// later delivery may succeed.
    Unavailable(String),
}

#[derive(Debug, Clone)]
pub struct TaskReport {
    pub task_id: i64,
    pub task_type: TaskType,
    pub offset: Option<i64>,
    pub outcome: ExecutionOutcome,
    pub elapsed: Duration,
}
