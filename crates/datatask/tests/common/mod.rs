//! Shared harness: a file-backed database, an object store and a task topic
//! inside one temp directory.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tempfile::TempDir;

use datatask::config::Config;
use datatask::db::Database;
use datatask::queue::{SqliteConsumer, SqliteQueue};
use datatask::storage::FsObjectStore;
use datatask::worker::{ConsumerStats, StopMode, TaskConsumer, TaskExecutor, WorkerPool};
use datatask::TaskEventBroadcaster;

pub const GROUP: &str = "datatask-workers";

pub struct Harness {
    pub dir: TempDir,
    pub config: Config,
    pub db: Database,
    pub queue: SqliteQueue,
    pub events: TaskEventBroadcaster,
}

impl Harness {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let objects = dir.path().join("objects");
        Self::with_objects(dir, &objects)
    }

    /// A second harness with its own database that reads and writes the
    /// same object store as `other`.
    pub fn sharing_objects_with(other: &Harness) -> Self {
        let objects = other.dir.path().join("objects");
        Self::with_objects(TempDir::new().unwrap(), &objects)
    }

    fn with_objects(dir: TempDir, objects: &Path) -> Self {
        let mut config = Config::default();
        config.database.path = Some(dir.path().join("datatask.db").to_string_lossy().into_owned());
        config.storage.root = Some(objects.to_string_lossy().into_owned());
        config.storage.signing_key = Some("integration-key".to_string());
        config.queue.poll_timeout_ms = 50;
        config.worker.worker_count = 2;
        config.report.reference_year = 2021;

        let db = Database::open(&config.database.resolved_path()).unwrap();
        let queue = SqliteQueue::new(db.clone(), &config.queue.topic, 2).unwrap();

        Self {
            dir,
            config,
            db,
            queue,
            events: TaskEventBroadcaster::new(256),
        }
    }

    pub fn store(&self) -> FsObjectStore {
        FsObjectStore::from_config(&self.config.storage).unwrap()
    }

    pub fn executor(&self) -> TaskExecutor {
        TaskExecutor::new(
            self.db.clone(),
            Arc::new(self.store()),
            Arc::new(self.config.clone()),
        )
        .with_events(self.events.clone())
    }

    pub fn consumer(&self) -> TaskConsumer<SqliteConsumer> {
        let pool = WorkerPool::new(
            &self.executor(),
            self.config.worker.effective_worker_count(),
            self.config.worker.effective_queue_capacity(),
        )
        .unwrap();
        TaskConsumer::new(
            self.queue.consumer(GROUP).unwrap(),
            pool,
            Duration::from_millis(self.config.queue.poll_timeout_ms),
        )
    }

    /// Consumes everything currently on the topic.
    pub fn drain(&self) -> ConsumerStats {
        self.consumer().run(StopMode::WhenIdle).unwrap()
    }
}

pub fn department(id: i64, name: &str) -> Value {
    json!({"id": id, "department": name})
}

pub fn job(id: i64, name: &str) -> Value {
    json!({"id": id, "job": name})
}

pub fn employee(id: i64, hired: &str, department_id: i64, job_id: i64) -> Value {
    json!({
        "id": id,
        "name": format!("Employee {}", id),
        "datetime": hired,
        "department_id": department_id,
        "job_id": job_id,
    })
}
