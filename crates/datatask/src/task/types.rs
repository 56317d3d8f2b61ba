use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown {kind} '{value}'")]
pub struct ParseError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// Kind of work a task performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    Load,
    Backup,
    Restore,
    Report,
    Migration,
}

impl TaskType {
    pub const ALL: [TaskType; 5] = [
        TaskType::Load,
        TaskType::Backup,
        TaskType::Restore,
        TaskType::Report,
        TaskType::Migration,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Load => "LOAD",
            TaskType::Backup => "BACKUP",
            TaskType::Restore => "RESTORE",
            TaskType::Report => "REPORT",
            TaskType::Migration => "MIGRATION",
        }
    }

    /// Stable id in the `task_type` reference table.
    pub fn reference_id(&self) -> i64 {
        match self {
            TaskType::Load => 1,
            TaskType::Backup => 2,
            TaskType::Restore => 3,
            TaskType::Report => 4,
            TaskType::Migration => 5,
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ParseError::new("task type", s))
    }
}

/// Lifecycle state of a task.
///
/// Transitions only move forward: PENDING -> IN_PROGRESS -> COMPLETED | FAILED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 4] = [
        TaskStatus::Pending,
        TaskStatus::InProgress,
        TaskStatus::Completed,
        TaskStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::InProgress => "IN_PROGRESS",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
        }
    }

    /// Stable id in the `task_status` reference table.
    pub fn reference_id(&self) -> i64 {
        match self {
            TaskStatus::Pending => 1,
            TaskStatus::InProgress => 2,
            TaskStatus::Completed => 3,
            TaskStatus::Failed => 4,
        }
    }

    pub fn from_reference_id(id: i64) -> Option<Self> {
        TaskStatus::ALL
            .into_iter()
            .find(|s| s.reference_id() == id)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Pending, TaskStatus::InProgress)
                | (TaskStatus::InProgress, TaskStatus::Completed)
                | (TaskStatus::InProgress, TaskStatus::Failed)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskStatus::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ParseError::new("task status", s))
    }
}

/// Business tables that can be backed up and restored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Table {
    Department,
    Job,
    Employee,
}

impl Table {
    pub const ALL: [Table; 3] = [Table::Department, Table::Job, Table::Employee];

    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Department => "department",
            Table::Job => "job",
            Table::Employee => "employee",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Table {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Table::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ParseError::new("table", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportType {
    /// Hires per department and job, split by quarter.
    Type1,
    /// Departments hiring strictly above the mean.
    Type2,
}

impl ReportType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportType::Type1 => "type1",
            ReportType::Type2 => "type2",
        }
    }
}

impl fmt::Display for ReportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "type1" => Ok(ReportType::Type1),
            "type2" => Ok(ReportType::Type2),
            other => Err(ParseError::new("report type", other)),
        }
    }
}
