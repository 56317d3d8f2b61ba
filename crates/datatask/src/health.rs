//! Liveness of the entity store and the message channel.

use serde::Serialize;

use crate::db::Database;
use crate::queue::SqliteQueue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Ok,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComponentHealth {
    pub status: HealthState,
    pub message: String,
}

impl ComponentHealth {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            status: HealthState::Ok,
            message: message.into(),
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            status: HealthState::Error,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthStatus {
    pub version: &'static str,
    pub database: ComponentHealth,
    pub queue: ComponentHealth,
    pub general_status: HealthState,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        self.general_status == HealthState::Ok
    }
}

/// Probes the database and reports how far `group` is behind on the topic.
pub fn check(db: &Database, queue: &SqliteQueue, group: &str) -> HealthStatus {
    let database = match db.ping() {
        Ok(()) => ComponentHealth::ok("Database connection is healthy"),
        Err(e) => ComponentHealth::error(e.to_string()),
    };

    let queue = match queue.pending(group) {
        Ok(pending) => ComponentHealth::ok(format!(
            "Topic '{}' reachable, {} pending for group '{}'",
            queue.topic(),
            pending,
            group
        )),
        Err(e) => ComponentHealth::error(e.to_string()),
    };

    let general_status =
        if database.status == HealthState::Ok && queue.status == HealthState::Ok {
            HealthState::Ok
        } else {
            HealthState::Error
        };

    HealthStatus {
        version: env!("CARGO_PKG_VERSION"),
        database,
        queue,
        general_status,
    }
}
