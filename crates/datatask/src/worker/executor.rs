//! Lifecycle of a single task on a worker thread.
//!
//! Load the task, skip it when it is already terminal or held by another
//! worker, claim it as IN_PROGRESS, run the handler and persist the terminal
//! status. The handler runs behind `catch_unwind`, so a panic becomes a
//! FAILED task instead of a dead worker.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, info_span, warn};

use super::job::{ExecutionOutcome, SkipReason, TaskJob, TaskReport};
use crate::broadcast::{TaskEvent, TaskEventBroadcaster};
use crate::config::Config;
use crate::db::task_repo::{self, StatusUpdate, TaskRow};
use crate::db::{Database, DatabaseError};
use crate::dispatch::dispatch;
use crate::error::WorkerError;
use crate::handlers::HandlerContext;
use crate::storage::ObjectStore;
use crate::task::{TaskError, TaskOutcome, TaskStatus, TaskType};

pub struct TaskExecutor {
    db: Database,
    store: Arc<dyn ObjectStore>,
    config: Arc<Config>,
    events: Option<TaskEventBroadcaster>,
}

impl TaskExecutor {
    pub fn new(db: Database, store: Arc<dyn ObjectStore>, config: Arc<Config>) -> Self {
        Self {
            db,
            store,
            config,
            events: None,
        }
    }

    pub fn with_events(mut self, events: TaskEventBroadcaster) -> Self {
        self.events = Some(events);
        self
    }

    /// Same executor on a fresh database connection, for another worker.
    pub fn fork(&self) -> Result<Self, WorkerError> {
        Ok(Self {
            db: self.db.reopen()?,
            store: Arc::clone(&self.store),
            config: Arc::clone(&self.config),
            events: self.events.clone(),
        })
    }

    pub fn execute(&self, job: &TaskJob) -> TaskReport {
        let _span = info_span!(
            "task",
            task_id = job.task_id(),
            task_type = %job.task_type(),
        )
        .entered();
        let started = Instant::now();

        let outcome = self.run(job);
        match &outcome {
            ExecutionOutcome::Completed => {
                info!("Task {} has been successfully processed.", job.task_id())
            }
            ExecutionOutcome::Failed(e) => warn!(error = %e, "Task {} has failed.", job.task_id()),
            ExecutionOutcome::Skipped(reason) => {
                info!("Task {} skipped: {}", job.task_id(), reason)
            }
            ExecutionOutcome::Dropped(reason) => {
                error!("Dropped message for task {}: {}", job.task_id(), reason)
            }
            ExecutionOutcome::Unavailable(reason) => {
                warn!("Store unavailable for task {}, left as is: {}", job.task_id(), reason)
            }
        }

        TaskReport {
            task_id: job.task_id(),
            task_type: job.task_type(),
            offset: job.offset,
            outcome,
            elapsed: started.elapsed(),
        }
    }

    fn run(&self, job: &TaskJob) -> ExecutionOutcome {
        let task_id = job.task_id();

        let task = match task_repo::find_by_id(&self.db, task_id) {
            Ok(Some(task)) => task,
            Ok(None) => return ExecutionOutcome::Dropped(WorkerError::TaskNotFound(task_id).to_string()),
            Err(e) => return store_failure(e),
        };

        if task.task_type != job.task_type() {
            return ExecutionOutcome::Dropped(
                WorkerError::TaskTypeMismatch {
                    task_id,
                    stored: task.task_type,
                    received: job.task_type(),
                }
                .to_string(),
            );
        }

        if let Err(outcome) = self.claim(&task) {
            return outcome;
        }

        let result = job.message.payload().and_then(|payload| {
            let ctx = HandlerContext::new(&self.db, self.store.as_ref(), &self.config);
            debug!("Dispatching {} handler", payload.task_type());
            catch_unwind(AssertUnwindSafe(|| dispatch(&payload, &ctx, task_id)))
                .unwrap_or_else(|panic| Err(TaskError::Panicked(panic_message(&*panic))))
        });

        self.finish(task_id, task.task_type, TaskOutcome::from(result))
    }

    /// Moves the task to IN_PROGRESS, or explains why it must not run.
    fn claim(&self, task: &TaskRow) -> Result<(), ExecutionOutcome> {
        match task.status {
            TaskStatus::Completed => Err(ExecutionOutcome::Skipped(SkipReason::AlreadyCompleted)),
            TaskStatus::Failed => Err(ExecutionOutcome::Skipped(SkipReason::AlreadyFailed)),
            TaskStatus::InProgress => self.reclaim(task),
            TaskStatus::Pending => {
                info!("Processing task {}...", task.id);
                match task_repo::update_status(&self.db, task.id, TaskStatus::InProgress, None) {
                    Ok(StatusUpdate::Applied(_)) => {
                        self.emit(TaskEvent::new(task.id, task.task_type, TaskStatus::InProgress));
                        Ok(())
                    }
                    Ok(StatusUpdate::Rejected { current }) => Err(ExecutionOutcome::Skipped(
                        skip_reason_for(current),
                    )),
                    Err(e) => Err(store_failure(e)),
                }
            }
        }
    }

    /// Takes over an IN_PROGRESS task whose claim is older than
    /// `worker.stale_after_secs`.
    fn reclaim(&self, task: &TaskRow) -> Result<(), ExecutionOutcome> {
        let secs = i64::try_from(self.config.worker.stale_after_secs).unwrap_or(i64::MAX);
        let cutoff = chrono::Duration::try_seconds(secs)
            .and_then(|age| Utc::now().checked_sub_signed(age))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        match task_repo::reclaim_stale(&self.db, task.id, cutoff) {
            Ok(Some(_)) => {
                warn!(
                    started_at = ?task.start_at,
                    "Reclaiming task {} abandoned in progress",
                    task.id
                );
                Ok(())
            }
            Ok(None) => Err(ExecutionOutcome::Skipped(SkipReason::ClaimedElsewhere)),
            Err(e) => Err(store_failure(e)),
        }
    }

    fn finish(&self, task_id: i64, task_type: TaskType, outcome: TaskOutcome) -> ExecutionOutcome {
        let status = outcome.status();
        match task_repo::update_status(&self.db, task_id, status, Some(&outcome)) {
            Ok(StatusUpdate::Applied(_)) => {
                let event = match &outcome {
                    TaskOutcome::Result(_) => TaskEvent::new(task_id, task_type, status),
                    TaskOutcome::Error(message) => TaskEvent::failed(task_id, task_type, message),
                };
                self.emit(event);
                match outcome {
                    TaskOutcome::Result(_) => ExecutionOutcome::Completed,
                    TaskOutcome::Error(message) => ExecutionOutcome::Failed(message),
                }
            }
            Ok(StatusUpdate::Rejected { current }) => ExecutionOutcome::Skipped(skip_reason_for(current)),
            Err(e) if e.is_transient() => ExecutionOutcome::Unavailable(format!(
                "could not record {} status: {}",
                status, e
            )),
            Err(e) => ExecutionOutcome::Dropped(format!(
                "could not record {} status: {}",
                status, e
            )),
        }
    }

    fn emit(&self, event: TaskEvent) {
        if let Some(events) = &self.events {
            events.send(event);
        }
    }
}

/// Busy or locked stores are reported apart from errors that no retry fixes.
fn store_failure(e: DatabaseError) -> ExecutionOutcome {
    if e.is_transient() {
        ExecutionOutcome::Unavailable(e.to_string())
    } else {
        ExecutionOutcome::Dropped(e.to_string())
    }
}

fn skip_reason_for(current: TaskStatus) -> SkipReason {
    match current {
        TaskStatus::Completed => SkipReason::AlreadyCompleted,
        TaskStatus::Failed => SkipReason::AlreadyFailed,
        TaskStatus::Pending | TaskStatus::InProgress => SkipReason::ClaimedElsewhere,
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}
