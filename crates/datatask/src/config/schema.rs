use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::secrets::{expand_home, resolve_secret_optional, SecretError};

pub const CONFIG_VERSION: &str = "1.0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub report: ReportConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_version() -> String {
    CONFIG_VERSION.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            database: DatabaseConfig::default(),
            queue: QueueConfig::default(),
            storage: StorageConfig::default(),
            worker: WorkerConfig::default(),
            report: ReportConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file. Defaults to `~/.datatask/data/datatask.db`.
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: None,
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

impl DatabaseConfig {
    pub fn resolved_path(&self) -> PathBuf {
        match &self.path {
            Some(path) => PathBuf::from(expand_home(path)),
            None => crate::db::default_database_path()
                .unwrap_or_else(|| PathBuf::from("datatask.db")),
        }
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_topic")]
    pub topic: String,
    #[serde(default = "default_group_id")]
    pub group_id: String,
    #[serde(default = "default_partitions")]
    pub partitions: u32,
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
}

fn default_topic() -> String {
    "datatask-tasks".to_string()
}

fn default_group_id() -> String {
    "datatask-workers".to_string()
}

fn default_partitions() -> u32 {
    1
}

fn default_poll_timeout_ms() -> u64 {
    1000
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            topic: default_topic(),
            group_id: default_group_id(),
            partitions: default_partitions(),
            poll_timeout_ms: default_poll_timeout_ms(),
        }
    }
}

impl QueueConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding the buckets. Defaults to `~/.datatask/objects`.
    #[serde(default)]
    pub root: Option<String>,
    #[serde(default = "default_bucket")]
    pub bucket: String,
    /// Base of presigned URLs.
    #[serde(default = "default_public_url")]
    pub public_url: String,
    #[serde(default = "default_presign_expiry_secs")]
    pub presign_expiry_secs: u64,
    #[serde(default)]
    pub signing_key: Option<String>,
    #[serde(default)]
    pub signing_key_file: Option<String>,
    #[serde(default)]
    pub signing_key_env: Option<String>,
}

fn default_bucket() -> String {
    "datatask".to_string()
}

fn default_public_url() -> String {
    "http://localhost:9000".to_string()
}

fn default_presign_expiry_secs() -> u64 {
    86_400
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: None,
            bucket: default_bucket(),
            public_url: default_public_url(),
            presign_expiry_secs: default_presign_expiry_secs(),
            signing_key: None,
            signing_key_file: None,
            signing_key_env: None,
        }
    }
}

impl StorageConfig {
    pub fn resolved_root(&self) -> PathBuf {
        match &self.root {
            Some(root) => PathBuf::from(expand_home(root)),
            None => dirs::home_dir()
                .map(|h| h.join(".datatask").join("objects"))
                .unwrap_or_else(|| PathBuf::from("objects")),
        }
    }

    pub fn presign_expiry(&self) -> Duration {
        Duration::from_secs(self.presign_expiry_secs)
    }

    /// URL-signing key, `None` when no source is configured.
    pub fn signing_key(&self) -> Result<Option<SecretString>, SecretError> {
        resolve_secret_optional(
            self.signing_key.as_deref(),
            self.signing_key_file.as_deref(),
            self.signing_key_env.as_deref(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// Jobs waiting for a free worker before submission blocks.
    /// Defaults to twice the worker count.
    #[serde(default)]
    pub queue_capacity: Option<usize>,
    /// An IN_PROGRESS task older than this is assumed abandoned and may be
    /// picked up again when its message is redelivered.
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
}

/// Two workers, fewer on machines with a single core.
pub fn default_worker_count() -> usize {
    num_cpus::get().clamp(1, 2)
}

fn default_stale_after_secs() -> u64 {
    3600
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            queue_capacity: None,
            stale_after_secs: default_stale_after_secs(),
        }
    }
}

impl WorkerConfig {
    pub fn effective_worker_count(&self) -> usize {
        self.worker_count.max(1)
    }

    pub fn effective_queue_capacity(&self) -> usize {
        self.queue_capacity
            .unwrap_or(self.effective_worker_count() * 2)
            .max(1)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Year the hiring reports aggregate over.
    #[serde(default = "default_reference_year")]
    pub reference_year: i32,
}

fn default_reference_year() -> i32 {
    2021
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            reference_year: default_reference_year(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}
