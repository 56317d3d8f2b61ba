//! Business operations behind each executable task type.
//!
//! Every handler returns `Result<Value, TaskError>`; the `Ok` value is
//! stored under `config.result`, the error's text under `config.error`.

use std::time::Duration;

use crate::config::Config;
use crate::db::Database;
use crate::storage::ObjectStore;

pub mod backup;
pub mod load;
pub mod render;
pub mod report;
pub mod restore;

/// Resources a handler may touch while executing one task.
pub struct HandlerContext<'a> {
    pub db: &'a Database,
    pub store: &'a dyn ObjectStore,
    /// Year the hiring reports aggregate over.
    pub reference_year: i32,
    pub presign_expiry: Duration,
}

impl<'a> HandlerContext<'a> {
    pub fn new(db: &'a Database, store: &'a dyn ObjectStore, config: &Config) -> Self {
        Self {
            db,
            store,
            reference_year: config.report.reference_year,
            presign_expiry: config.storage.presign_expiry(),
        }
    }
}
