pub mod loader;
pub mod schema;

pub use loader::{
    apply_env_overrides, apply_overrides_from, load_config, load_config_from_str,
    load_or_default, validate_config,
};
pub use schema::{
    default_worker_count, Config, DatabaseConfig, LoggingConfig, QueueConfig, ReportConfig,
    StorageConfig, WorkerConfig, CONFIG_VERSION,
};
