//! Task status broadcaster.
//!
//! Every persisted status transition is published here. Subscribers that
//! fall behind lose the oldest events; the task table stays authoritative.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::task::{TaskStatus, TaskType};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskEvent {
    pub task_id: i64,
    pub task_type: TaskType,
    pub status: TaskStatus,
    /// Human-readable description of the transition.
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskEvent {
    pub fn new(task_id: i64, task_type: TaskType, status: TaskStatus) -> Self {
        let message = match status {
            TaskStatus::Pending => format!("Task {} queued", task_id),
            TaskStatus::InProgress => format!("Processing task {}...", task_id),
            TaskStatus::Completed => format!("Task {} has been successfully processed.", task_id),
            TaskStatus::Failed => format!("Task {} has failed.", task_id),
        };
        Self {
            task_id,
            task_type,
            status,
            message,
            timestamp: Utc::now(),
            error: None,
        }
    }

    pub fn failed(task_id: i64, task_type: TaskType, error: &str) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Self::new(task_id, task_type, TaskStatus::Failed)
        }
    }
}

#[derive(Clone)]
pub struct TaskEventBroadcaster {
    sender: Arc<broadcast::Sender<TaskEvent>>,
}

impl TaskEventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn send(&self, event: TaskEvent) {
        // No subscribers is fine.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.sender.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for TaskEventBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribers_receive_events_in_order() {
        let broadcaster = TaskEventBroadcaster::new(8);
        let mut rx = broadcaster.subscribe();

        broadcaster.send(TaskEvent::new(1, TaskType::Load, TaskStatus::InProgress));
        broadcaster.send(TaskEvent::failed(1, TaskType::Load, "boom"));

        let first = rx.try_recv().unwrap();
        assert_eq!(first.status, TaskStatus::InProgress);
        assert_eq!(first.message, "Processing task 1...");

        let second = rx.try_recv().unwrap();
        assert_eq!(second.status, TaskStatus::Failed);
        assert_eq!(second.error.as_deref(), Some("boom"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_send_without_subscribers_is_silent() {
        let broadcaster = TaskEventBroadcaster::default();
        assert_eq!(broadcaster.receiver_count(), 0);
        broadcaster.send(TaskEvent::new(2, TaskType::Report, TaskStatus::Completed));
    }

    #[test]
    fn test_event_serializes_camel_case() {
        let event = TaskEvent::new(3, TaskType::Backup, TaskStatus::Completed);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["taskId"], 3);
        assert_eq!(json["taskType"], "BACKUP");
        assert_eq!(json["status"], "COMPLETED");
        assert!(json.get("error").is_none());
    }
}
