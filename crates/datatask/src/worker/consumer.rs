//! Consumer loop: poll the channel, decode, hand off to the pool, commit.
//!
//! The loop never runs handlers itself. A message's offset is committed
//! once the job is queued on the pool; if the process dies before that,
//! the message is redelivered and the executor's status checks keep the
//! second delivery harmless.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::job::{ExecutionOutcome, TaskJob, TaskReport};
use super::pool::WorkerPool;
use crate::error::DataTaskError;
use crate::queue::{Delivery, MessageChannel, QueueError};
use crate::task::TaskMessage;

/// Cloneable flag used to stop the consumer from another thread or a
/// signal handler.
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle(Arc<AtomicBool>);

impl ShutdownHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConsumerStats {
    pub received: u64,
    pub malformed: u64,
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub skipped: u64,
    pub dropped: u64,
    pub unavailable: u64,
}

impl ConsumerStats {
    fn record(&mut self, report: &TaskReport) {
        match report.outcome {
            ExecutionOutcome::Completed => self.completed += 1,
            ExecutionOutcome::Failed(_) => self.failed += 1,
            ExecutionOutcome::Skipped(_) => self.skipped += 1,
            ExecutionOutcome::Dropped(_) => self.dropped += 1,
            ExecutionOutcome::Unavailable(_) => self.unavailable += 1,
        }
    }
}

/// When [`TaskConsumer::run`] stops on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopMode {
    /// Only on shutdown request or a closed channel.
    OnShutdown,
    /// Also as soon as a poll comes back empty.
    WhenIdle,
}

pub struct TaskConsumer<C: MessageChannel> {
    channel: C,
    pool: WorkerPool,
    poll_timeout: Duration,
    shutdown: ShutdownHandle,
    stats: ConsumerStats,
}

impl<C: MessageChannel> TaskConsumer<C> {
    pub fn new(channel: C, pool: WorkerPool, poll_timeout: Duration) -> Self {
        Self {
            channel,
            pool,
            poll_timeout,
            shutdown: ShutdownHandle::new(),
            stats: ConsumerStats::default(),
        }
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Runs the loop, then closes the channel and drains the pool.
    pub fn run(mut self, mode: StopMode) -> Result<ConsumerStats, DataTaskError> {
        info!("Starting consumer...");
        let result = self.consume(mode);

        info!("Closing consumer...");
        if let Err(e) = self.channel.close() {
            warn!(error = %e, "Failed to close channel");
        }
        self.pool.shutdown();

        let mut stats = self.stats;
        for report in self.pool.wait() {
            stats.record(&report);
        }
        info!(?stats, "Consumer stopped");

        result.map(|_| stats)
    }

    fn consume(&mut self, mode: StopMode) -> Result<(), DataTaskError> {
        while !self.shutdown.is_requested() {
            self.collect_reports();

            match self.channel.poll(self.poll_timeout) {
                Ok(Some(delivery)) => self.handle(delivery)?,
                Ok(None) => {
                    if mode == StopMode::WhenIdle {
                        debug!("Channel idle, stopping");
                        break;
                    }
                }
                Err(QueueError::Closed) => break,
                Err(e) => {
                    error!(error = %e, "Polling failed");
                    std::thread::sleep(self.poll_timeout);
                }
            }
        }
        Ok(())
    }

    fn handle(&mut self, delivery: Delivery) -> Result<(), DataTaskError> {
        self.stats.received += 1;

        match TaskMessage::decode(&delivery.payload) {
            Ok(message) => {
                debug!(task_id = message.task_id, offset = delivery.offset, "Submitting task");
                self.pool
                    .submit(TaskJob::from_delivery(message, delivery.offset))?;
                self.stats.submitted += 1;
            }
            Err(e) => {
                self.stats.malformed += 1;
                error!(offset = delivery.offset, error = %e, "Dropping malformed message");
            }
        }

        if let Err(e) = self.channel.commit(&delivery) {
            error!(offset = delivery.offset, error = %e, "Commit failed; message may be redelivered");
        }
        Ok(())
    }

    fn collect_reports(&mut self) {
        while let Some(report) = self.pool.try_recv_result() {
            self.stats.record(&report);
        }
    }
}
