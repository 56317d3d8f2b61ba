//! Process-wide logging setup.
//!
//! Low-level modules emit through the `log` facade; the execution path uses
//! `tracing` spans. Both end up in the same subscriber.

use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

use crate::config::LoggingConfig;
use crate::error::DataTaskError;

/// Builds the filter from `RUST_LOG` when set, otherwise from the config level.
pub fn env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level))
}

/// Installs the global subscriber. Call once, before any worker starts.
pub fn init_logging(config: &LoggingConfig) -> Result<(), DataTaskError> {
    tracing_log::LogTracer::init()
        .map_err(|e| DataTaskError::Logging(format!("log bridge: {}", e)))?;

    let filter = env_filter(config);
    let result = if config.json {
        let subscriber = Registry::default().with(filter).with(
            fmt::layer()
                .json()
                .with_target(true)
                .with_thread_names(true)
                .with_current_span(true),
        );
        tracing::subscriber::set_global_default(subscriber)
    } else {
        let subscriber = Registry::default().with(filter).with(
            fmt::layer()
                .with_target(true)
                .with_thread_names(true),
        );
        tracing::subscriber::set_global_default(subscriber)
    };

    result.map_err(|e| DataTaskError::Logging(e.to_string()))?;

    tracing::debug!(level = %config.level, json = config.json, "Logging initialized");
    Ok(())
}
