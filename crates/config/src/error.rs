//! Configuration error types

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during configuration loading and validation
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file
    #[error("Failed to read config file at {path}: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse TOML configuration
    #[error("Failed to parse TOML config: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// Failed to serialize TOML configuration
    #[error("Failed to serialize TOML config: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// A setting that must be positive is zero
    #[error("Invalid {name}: must be positive, got {value}")]
    NonPositive { name: &'static str, value: u64 },

    /// Task queue cannot hold a single request batch
    #[error("Invalid world_state_task_capacity: must be at least world_state_hash_count_per_request ({batch}), got {capacity}")]
    TaskCapacityTooSmall { capacity: usize, batch: usize },

    /// Invalid log level
    #[error("Invalid log level: {0}. Valid values: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    /// Invalid log format
    #[error("Invalid log format: {0}. Valid values: json, pretty, compact")]
    InvalidLogFormat(String),

    /// The global tracing subscriber could not be installed
    #[error("Failed to initialize tracing: {0}")]
    TracingInit(String),
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;
