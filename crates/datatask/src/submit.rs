//! Submitting side: create the task record, then publish its message.
//!
//! A task row always exists before its message does, so a worker never sees
//! an id the store does not know. If publishing fails the row stays PENDING
//! and is reported back to the caller through the error.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::db::{task_repo, Database, DatabaseError};
use crate::queue::{MessagePublisher, QueueError};
use crate::task::{
    MessageError, TaskMessage, TaskPayload, TaskStatus, TaskType, MAX_UPLOAD_ROWS,
};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Error, Debug)]
pub enum SubmitError {
    #[error("No data provided")]
    NoDataProvided,

    #[error("The data size limit is {limit} records per request, got {rows}")]
    DataSizeLimitExceeded { rows: usize, limit: usize },

    #[error("Failed to create task: {0}")]
    Database(#[from] DatabaseError),

    #[error("Task {task_id} was created but could not be queued: {source}")]
    Queue {
        task_id: i64,
        #[source]
        source: QueueError,
    },

    #[error("Failed to encode task message: {0}")]
    Encode(#[from] MessageError),
}

/// What the caller gets back for an accepted submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmitReceipt {
    pub task_id: i64,
    pub name: String,
    pub message: String,
}

pub fn created_message(id: i64, name: &str) -> String {
    format!(
        "'{}' task created with id '{}'. Use this id to check the task status",
        name, id
    )
}

pub struct TaskSubmitter<P: MessagePublisher> {
    db: Database,
    publisher: P,
}

impl<P: MessagePublisher> TaskSubmitter<P> {
    pub fn new(db: Database, publisher: P) -> Self {
        Self { db, publisher }
    }

    pub fn submit(&self, payload: TaskPayload) -> Result<SubmitReceipt, SubmitError> {
        validate(&payload)?;

        let created = task_repo::create_task(&self.db, payload.task_type())?;
        let bytes = TaskMessage::new(created.id, &payload).encode()?;

        let offset = self
            .publisher
            .publish(created.id, &bytes)
            .map_err(|source| {
                warn!(task_id = created.id, error = %source, "Task left pending, publish failed");
                SubmitError::Queue {
                    task_id: created.id,
                    source,
                }
            })?;

        info!(task_id = created.id, name = %created.name, offset, "Task submitted");

        Ok(SubmitReceipt {
            message: created_message(created.id, &created.name),
            task_id: created.id,
            name: created.name,
        })
    }
}

fn validate(payload: &TaskPayload) -> Result<(), SubmitError> {
    if let TaskPayload::Load(upload) = payload {
        let rows = upload.total_rows();
        if rows == 0 {
            return Err(SubmitError::NoDataProvided);
        }
        if rows > MAX_UPLOAD_ROWS {
            return Err(SubmitError::DataSizeLimitExceeded {
                rows,
                limit: MAX_UPLOAD_ROWS,
            });
        }
    }
    Ok(())
}

/// Caller-facing view of a task. `result` is only shown once the task has
/// completed and `error` only once it has failed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskView {
    pub id: i64,
    pub name: String,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub start_at: Option<String>,
    pub end_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn format_time(t: Option<DateTime<Utc>>) -> Option<String> {
    t.map(|t| t.format(TIMESTAMP_FORMAT).to_string())
}

impl From<task_repo::TaskRow> for TaskView {
    fn from(row: task_repo::TaskRow) -> Self {
        let result = match row.status {
            TaskStatus::Completed => row.config.get("result").cloned(),
            _ => None,
        };
        let error = match row.status {
            TaskStatus::Failed => row
                .config
                .get("error")
                .and_then(Value::as_str)
                .map(str::to_string),
            _ => None,
        };
        Self {
            id: row.id,
            name: row.name,
            task_type: row.task_type,
            status: row.status,
            start_at: format_time(row.start_at),
            end_at: format_time(row.end_at),
            result,
            error,
        }
    }
}

/// Looks up a task for display. `Ok(None)` when the id is unknown.
pub fn task_status(db: &Database, id: i64) -> Result<Option<TaskView>, DatabaseError> {
    Ok(task_repo::find_by_id(db, id)?.map(TaskView::from))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::SqliteQueue;
    use crate::task::{ReportPayload, ReportType, Table, TablePayload, TaskOutcome, UploadPayload};
    use serde_json::json;
    use std::sync::Mutex;

    /// Publisher that records what it was given, or refuses everything.
    #[derive(Default)]
    struct RecordingPublisher {
        sent: Mutex<Vec<(i64, Vec<u8>)>>,
        refuse: bool,
    }

    impl MessagePublisher for RecordingPublisher {
        fn publish(&self, key: i64, payload: &[u8]) -> Result<i64, QueueError> {
            if self.refuse {
                return Err(QueueError::Closed);
            }
            let mut sent = self.sent.lock().unwrap();
            sent.push((key, payload.to_vec()));
            Ok(sent.len() as i64)
        }
    }

    fn upload(rows: usize) -> TaskPayload {
        TaskPayload::Load(UploadPayload {
            departments: (0..rows).map(|i| json!({"id": i, "department": "d"})).collect(),
            ..Default::default()
        })
    }

    #[test]
    fn test_submit_creates_pending_task_and_publishes() {
        let db = Database::open_in_memory().unwrap();
        let submitter = TaskSubmitter::new(db.clone(), RecordingPublisher::default());

        let receipt = submitter
            .submit(TaskPayload::Report(ReportPayload {
                report_type: ReportType::Type2,
            }))
            .unwrap();

        let row = task_repo::get_task(&db, receipt.task_id).unwrap();
        assert_eq!(row.status, TaskStatus::Pending);
        assert_eq!(row.task_type, TaskType::Report);
        assert_eq!(receipt.name, row.name);
        assert_eq!(
            receipt.message,
            format!(
                "'{}' task created with id '{}'. Use this id to check the task status",
                row.name, row.id
            )
        );

        let sent = submitter.publisher.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, receipt.task_id);
        let message = TaskMessage::decode(&sent[0].1).unwrap();
        assert_eq!(message.task_id, receipt.task_id);
        assert_eq!(message.task, TaskType::Report);
        assert_eq!(message.data, Some(json!({"report_type": "type2"})));
    }

    #[test]
    fn test_empty_upload_is_rejected_before_task_exists() {
        let db = Database::open_in_memory().unwrap();
        let submitter = TaskSubmitter::new(db.clone(), RecordingPublisher::default());

        let err = submitter.submit(upload(0)).unwrap_err();
        assert!(matches!(err, SubmitError::NoDataProvided));
        assert_eq!(task_repo::list(&db, &Default::default()).unwrap().1, 0);
    }

    #[test]
    fn test_upload_limit_counts_all_kinds() {
        let db = Database::open_in_memory().unwrap();
        let submitter = TaskSubmitter::new(db, RecordingPublisher::default());

        assert!(submitter.submit(upload(MAX_UPLOAD_ROWS)).is_ok());

        let mut payload = UploadPayload {
            departments: vec![json!({}); 600],
            jobs: vec![json!({}); 401],
            employees: vec![],
        };
        let err = submitter
            .submit(TaskPayload::Load(payload.clone()))
            .unwrap_err();
        assert!(matches!(
            err,
            SubmitError::DataSizeLimitExceeded { rows: 1001, limit: 1000 }
        ));

        payload.jobs.pop();
        assert!(submitter.submit(TaskPayload::Load(payload)).is_ok());
    }

    #[test]
    fn test_publish_failure_leaves_task_pending() {
        let db = Database::open_in_memory().unwrap();
        let submitter = TaskSubmitter::new(
            db.clone(),
            RecordingPublisher {
                refuse: true,
                ..Default::default()
            },
        );

        let err = submitter
            .submit(TaskPayload::Backup(TablePayload {
                table_name: Table::Job,
            }))
            .unwrap_err();
        let SubmitError::Queue { task_id, .. } = err else {
            panic!("expected queue error, got {err:?}");
        };
        assert_eq!(
            task_repo::get_task(&db, task_id).unwrap().status,
            TaskStatus::Pending
        );
    }

    #[test]
    fn test_submit_through_sqlite_queue() {
        let db = Database::open_in_memory().unwrap();
        let queue = SqliteQueue::new(db.clone(), "tasks", 1).unwrap();
        let submitter = TaskSubmitter::new(db, queue.clone());

        submitter.submit(upload(3)).unwrap();
        assert_eq!(queue.pending("workers").unwrap(), 1);
    }

    #[test]
    fn test_task_status_view() {
        let db = Database::open_in_memory().unwrap();
        assert!(task_status(&db, 42).unwrap().is_none());

        let created = task_repo::create_task(&db, TaskType::Backup).unwrap();
        let pending = task_status(&db, created.id).unwrap().unwrap();
        assert_eq!(pending.status, TaskStatus::Pending);
        assert!(pending.start_at.is_none());
        assert!(pending.result.is_none());

        task_repo::update_status(&db, created.id, TaskStatus::InProgress, None).unwrap();
        task_repo::update_status(
            &db,
            created.id,
            TaskStatus::Completed,
            Some(&TaskOutcome::Result(json!({"message": "done"}))),
        )
        .unwrap();

        let done = task_status(&db, created.id).unwrap().unwrap();
        assert_eq!(done.result, Some(json!({"message": "done"})));
        assert!(done.error.is_none());
        let start = done.start_at.unwrap();
        assert_eq!(start.len(), "2024-01-01 00:00:00".len());

        let rendered = serde_json::to_value(task_status(&db, created.id).unwrap().unwrap()).unwrap();
        assert_eq!(rendered["type"], "BACKUP");
        assert_eq!(rendered["status"], "COMPLETED");
    }

    #[test]
    fn test_failed_task_view_shows_error_only() {
        let db = Database::open_in_memory().unwrap();
        let created = task_repo::create_task(&db, TaskType::Restore).unwrap();
        task_repo::update_status(&db, created.id, TaskStatus::InProgress, None).unwrap();
        task_repo::update_status(
            &db,
            created.id,
            TaskStatus::Failed,
            Some(&TaskOutcome::Error("no backup".to_string())),
        )
        .unwrap();

        let view = task_status(&db, created.id).unwrap().unwrap();
        assert_eq!(view.error.as_deref(), Some("no backup"));
        assert!(view.result.is_none());
    }
}
