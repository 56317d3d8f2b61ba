//! Durable topic stored in the entity-store database.
//!
//! `queue_messages` is an append-only log; `queue_offsets` holds the last
//! committed offset per (group, topic, partition). A new group starts from
//! the earliest message.

use std::time::{Duration, Instant};

use rusqlite::{params, OptionalExtension};

use super::{Delivery, MessageChannel, MessagePublisher, QueueError};
use crate::db::Database;

const IDLE_SLEEP: Duration = Duration::from_millis(50);

/// Publisher handle for one topic. Cheap to clone.
#[derive(Clone)]
pub struct SqliteQueue {
    db: Database,
    topic: String,
    partitions: u32,
}

impl SqliteQueue {
    pub fn new(db: Database, topic: &str, partitions: u32) -> Result<Self, QueueError> {
        if partitions == 0 {
            return Err(QueueError::InvalidPartitions(partitions));
        }
        Ok(Self {
            db,
            topic: topic.to_string(),
            partitions,
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn partition_for(&self, key: i64) -> u32 {
        key.rem_euclid(self.partitions as i64) as u32
    }

    /// Opens a consumer for `group` on its own connection.
    ///
    /// Only one consumer per group is supported; partitions are not split
    /// between members.
    pub fn consumer(&self, group: &str) -> Result<SqliteConsumer, QueueError> {
        let db = self.db.reopen()?;
        let mut positions = vec![0i64; self.partitions as usize];
        db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT partition, committed_offset FROM queue_offsets
                 WHERE group_id = ?1 AND topic = ?2",
            )?;
            let rows = stmt
                .query_map(params![group, self.topic], |r| {
                    Ok((r.get::<_, u32>(0)?, r.get::<_, i64>(1)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            for (partition, offset) in rows {
                if let Some(slot) = positions.get_mut(partition as usize) {
                    *slot = offset;
                }
            }
            Ok(())
        })?;

        log::info!(
            "Consumer for group '{}' on topic '{}' starting at offsets {:?}",
            group,
            self.topic,
            positions
        );

        Ok(SqliteConsumer {
            db,
            topic: self.topic.clone(),
            group: group.to_string(),
            positions,
            closed: false,
        })
    }

    /// Number of messages not yet committed by `group`.
    pub fn pending(&self, group: &str) -> Result<u64, QueueError> {
        Ok(self.db.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM queue_messages m
                 LEFT JOIN queue_offsets o
                   ON o.group_id = ?2 AND o.topic = m.topic AND o.partition = m.partition
                 WHERE m.topic = ?1 AND m.id > COALESCE(o.committed_offset, 0)",
                params![self.topic, group],
                |r| r.get(0),
            )?)
        })?)
    }
}

impl MessagePublisher for SqliteQueue {
    fn publish(&self, key: i64, payload: &[u8]) -> Result<i64, QueueError> {
        let partition = self.partition_for(key);
        let offset = self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO queue_messages (topic, partition, payload) VALUES (?1, ?2, ?3)",
                params![self.topic, partition, payload],
            )?;
            Ok(conn.last_insert_rowid())
        })?;
        log::debug!(
            "Published message {} to {}[{}]",
            offset,
            self.topic,
            partition
        );
        Ok(offset)
    }
}

pub struct SqliteConsumer {
    db: Database,
    topic: String,
    group: String,
    /// Last delivered offset per partition.
    positions: Vec<i64>,
    closed: bool,
}

impl SqliteConsumer {
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Oldest undelivered message across all partitions.
    fn next_message(&self) -> Result<Option<Delivery>, QueueError> {
        let found = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT id, payload FROM queue_messages
                 WHERE topic = ?1 AND partition = ?2 AND id > ?3
                 ORDER BY id LIMIT 1",
            )?;
            let mut best: Option<Delivery> = None;
            for (partition, position) in self.positions.iter().enumerate() {
                let head = stmt
                    .query_row(params![self.topic, partition as u32, position], |r| {
                        Ok((r.get::<_, i64>(0)?, r.get::<_, Vec<u8>>(1)?))
                    })
                    .optional()?;
                if let Some((offset, payload)) = head {
                    if best.as_ref().map_or(true, |b| offset < b.offset) {
                        best = Some(Delivery {
                            offset,
                            partition: partition as u32,
                            payload,
                        });
                    }
                }
            }
            Ok(best)
        })?;
        Ok(found)
    }
}

impl MessageChannel for SqliteConsumer {
    fn poll(&mut self, timeout: Duration) -> Result<Option<Delivery>, QueueError> {
        if self.closed {
            return Err(QueueError::Closed);
        }
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(delivery) = self.next_message()? {
                if let Some(slot) = self.positions.get_mut(delivery.partition as usize) {
                    *slot = delivery.offset;
                }
                return Ok(Some(delivery));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            std::thread::sleep(IDLE_SLEEP.min(deadline - now));
        }
    }

    fn commit(&mut self, delivery: &Delivery) -> Result<(), QueueError> {
        if self.closed {
            return Err(QueueError::Closed);
        }
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO queue_offsets (group_id, topic, partition, committed_offset, updated_at)
                 VALUES (?1, ?2, ?3, ?4, strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
                 ON CONFLICT(group_id, topic, partition) DO UPDATE SET
                   committed_offset = MAX(committed_offset, excluded.committed_offset),
                   updated_at = excluded.updated_at",
                params![self.group, self.topic, delivery.partition, delivery.offset],
            )?;
            Ok(())
        })?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), QueueError> {
        if !self.closed {
            self.closed = true;
            log::info!("Closing consumer for group '{}'", self.group);
        }
        Ok(())
    }
}
