use std::path::Path;

use crate::config::schema::{Config, CONFIG_VERSION};
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../schema/config-v1.json");

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let config: Config = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
}

/// Config file when given, defaults otherwise; environment overrides win.
pub fn load_or_default(path: Option<&Path>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(path) => load_config(path)?,
        None => Config::default(),
    };
    apply_env_overrides(&mut config)?;
    validate_config(&config)?;
    Ok(config)
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != CONFIG_VERSION {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    if config.queue.topic.trim().is_empty() {
        return Err(invalid("queue.topic must not be empty"));
    }
    if config.queue.group_id.trim().is_empty() {
        return Err(invalid("queue.group_id must not be empty"));
    }
    if config.queue.partitions == 0 {
        return Err(invalid("queue.partitions must be at least 1"));
    }

    let bucket = &config.storage.bucket;
    let bucket_ok = !bucket.is_empty()
        && !bucket.starts_with('.')
        && bucket
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if !bucket_ok {
        return Err(invalid(format!("Invalid storage.bucket '{}'", bucket)));
    }
    if config.storage.presign_expiry_secs == 0 {
        return Err(invalid("storage.presign_expiry_secs must be positive"));
    }

    if !LOG_LEVELS.contains(&config.logging.level.to_ascii_lowercase().as_str()) {
        return Err(invalid(format!(
            "Unknown logging.level '{}'",
            config.logging.level
        )));
    }

    Ok(())
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        message: message.into(),
    }
}

/// Applies `DATATASK_*` variables from the process environment.
pub fn apply_env_overrides(config: &mut Config) -> Result<(), ConfigError> {
    apply_overrides_from(config, |name| std::env::var(name).ok())
}

/// Same as [`apply_env_overrides`] with an explicit variable lookup.
pub fn apply_overrides_from<F>(config: &mut Config, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = lookup("DATATASK_DB_PATH") {
        config.database.path = Some(path);
    }
    if let Some(topic) = lookup("DATATASK_TOPIC") {
        config.queue.topic = topic;
    }
    if let Some(group) = lookup("DATATASK_GROUP_ID") {
        config.queue.group_id = group;
    }
    if let Some(value) = lookup("DATATASK_PARTITIONS") {
        config.queue.partitions = parse_number("DATATASK_PARTITIONS", &value)?;
    }
    if let Some(root) = lookup("DATATASK_STORAGE_ROOT") {
        config.storage.root = Some(root);
    }
    if let Some(bucket) = lookup("DATATASK_BUCKET") {
        config.storage.bucket = bucket;
    }
    if let Some(value) = lookup("DATATASK_WORKERS") {
        config.worker.worker_count = parse_number("DATATASK_WORKERS", &value)?;
    }
    if let Some(level) = lookup("DATATASK_LOG_LEVEL") {
        if !LOG_LEVELS.contains(&level.to_ascii_lowercase().as_str()) {
            return Err(ConfigError::InvalidEnv {
                name: "DATATASK_LOG_LEVEL",
                value: level,
                reason: format!("expected one of {}", LOG_LEVELS.join(", ")),
            });
        }
        config.logging.level = level.to_ascii_lowercase();
    }
    Ok(())
}

fn parse_number<T>(name: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::InvalidEnv {
        name,
        value: value.to_string(),
        reason: e.to_string(),
    })
}
