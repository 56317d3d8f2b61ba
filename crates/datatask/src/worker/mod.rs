pub mod consumer;
pub mod executor;
pub mod job;
pub mod pool;

pub use consumer::{ConsumerStats, ShutdownHandle, StopMode, TaskConsumer};
pub use executor::TaskExecutor;
pub use job::{ExecutionOutcome, SkipReason, TaskJob, TaskReport};
pub use pool::WorkerPool;
