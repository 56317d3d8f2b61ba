//! At-least-once message channel between task submission and the workers.
//!
//! Messages are partitioned by key and consumed through a consumer group.
//! A message is redelivered until its offset is committed.

use std::time::Duration;

use thiserror::Error;

use crate::db::DatabaseError;

pub mod sqlite;

pub use sqlite::{SqliteConsumer, SqliteQueue};

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Queue storage error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Consumer is closed")]
    Closed,

    #[error("Partition count must be at least 1, got {0}")]
    InvalidPartitions(u32),
}

/// One message handed to a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Position of the message within its partition; increases monotonically.
    pub offset: i64,
    pub partition: u32,
    pub payload: Vec<u8>,
}

/// Consuming side of the channel.
pub trait MessageChannel: Send {
    /// Waits up to `timeout` for the next message. `Ok(None)` on timeout.
    fn poll(&mut self, timeout: Duration) -> Result<Option<Delivery>, QueueError>;

    /// Marks `delivery` and everything before it in its partition as consumed.
    fn commit(&mut self, delivery: &Delivery) -> Result<(), QueueError>;

    fn close(&mut self) -> Result<(), QueueError>;
}

/// Producing side of the channel.
pub trait MessagePublisher: Send + Sync {
    /// Appends `payload` to the partition chosen by `key`. Returns the offset.
    fn publish(&self, key: i64, payload: &[u8]) -> Result<i64, QueueError>;
}
