pub mod broadcast;
pub mod columnar;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod handlers;
pub mod health;
pub mod logging;
pub mod queue;
pub mod secrets;
pub mod storage;
pub mod submit;
pub mod task;
pub mod worker;

pub use broadcast::{TaskEvent, TaskEventBroadcaster};
pub use config::{load_config, load_or_default, Config};
pub use db::{Database, DatabaseError};
pub use dispatch::dispatch;
pub use error::{ConfigError, DataTaskError, Result, StorageError, WorkerError};
pub use handlers::HandlerContext;
pub use queue::{MessageChannel, MessagePublisher, QueueError, SqliteQueue};
pub use secrets::{resolve_secret, resolve_secret_optional, SecretError};
pub use storage::{FsObjectStore, ObjectStore, UrlSigner};
pub use submit::{task_status, SubmitError, SubmitReceipt, TaskSubmitter, TaskView};
pub use task::{TaskError, TaskMessage, TaskOutcome, TaskPayload, TaskStatus, TaskType};
pub use worker::{StopMode, TaskConsumer, TaskExecutor, WorkerPool};
