//! Main configuration module for Proto Core sync
//!
//! All settings are defined in one `protocore.toml` file.

use crate::error::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Main configuration struct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// World-state sync configuration
    pub sync: SyncConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// use protocore_config::Config;
    /// use std::path::Path;
    ///
    /// let config = Config::load(Path::new("protocore.toml"))?;
    /// ```
    pub fn load(path: &Path) -> ConfigResult<Self> {
        info!("Loading configuration from {:?}", path);

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config = Self::from_str(&content)?;

        info!(
            parallelism = config.sync.world_state_request_parallelism,
            hashes_per_request = config.sync.world_state_hash_count_per_request,
            "Configuration loaded"
        );

        Ok(config)
    }

    /// Load configuration from a TOML string.
    ///
    /// Useful for testing or when configuration is provided as a string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> ConfigResult<Self> {
        let config: Config = toml::from_str(content)?;
        debug!("Configuration parsed successfully, validating...");
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        self.sync.validate()?;
        self.logging.validate()?;

        debug!("Configuration validation passed");
        Ok(())
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| ConfigError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        info!("Configuration saved to {:?}", path);
        Ok(())
    }
}

// =============================================================================
// Sync Configuration
// =============================================================================

/// World-state download and peer policy settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Node hashes requested from a peer in one message
    pub world_state_hash_count_per_request: usize,

    /// Number of concurrent download workers
    pub world_state_request_parallelism: usize,

    /// Consecutive requests without progress before the download may stall
    pub world_state_max_requests_without_progress: u64,

    /// Minimum time without progress before the download is declared stalled
    pub world_state_min_millis_before_stalling: u64,

    /// Pending requests held before producers wait for workers to catch up
    pub world_state_task_capacity: usize,

    /// Timeout for a single node data request (milliseconds)
    pub world_state_request_timeout_ms: u64,

    /// Maximum number of peers allowed to trail the sync target.
    /// Unset means no limit.
    pub max_trailing_peers: Option<u64>,

    /// How many blocks behind the sync target a peer may be and still count
    /// as up to date
    pub trailing_peer_tolerance: u64,

    /// The trailing-peer limit is enforced on canonical blocks whose number is
    /// a multiple of this value
    pub trailing_peer_recheck_interval: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            world_state_hash_count_per_request: 384,
            world_state_request_parallelism: 10,
            world_state_max_requests_without_progress: 1000,
            world_state_min_millis_before_stalling: 5 * 60 * 1000,
            world_state_task_capacity: 100_000,
            world_state_request_timeout_ms: 10_000,
            max_trailing_peers: None,
            trailing_peer_tolerance: 0,
            trailing_peer_recheck_interval: 100,
        }
    }
}

impl SyncConfig {
    /// Validate the sync configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        let positive = [
            (
                "world_state_hash_count_per_request",
                self.world_state_hash_count_per_request as u64,
            ),
            (
                "world_state_request_parallelism",
                self.world_state_request_parallelism as u64,
            ),
            (
                "world_state_request_timeout_ms",
                self.world_state_request_timeout_ms,
            ),
            (
                "trailing_peer_recheck_interval",
                self.trailing_peer_recheck_interval,
            ),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(ConfigError::NonPositive { name, value });
            }
        }

        if self.world_state_task_capacity < self.world_state_hash_count_per_request {
            return Err(ConfigError::TaskCapacityTooSmall {
                capacity: self.world_state_task_capacity,
                batch: self.world_state_hash_count_per_request,
            });
        }

        Ok(())
    }

    /// Timeout for a single node data request
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.world_state_request_timeout_ms)
    }

    /// Minimum time without progress before the download is declared stalled
    pub fn min_time_before_stalling(&self) -> Duration {
        Duration::from_millis(self.world_state_min_millis_before_stalling)
    }
}

// =============================================================================
// Logging Configuration
// =============================================================================

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (json, pretty, compact)
    pub format: String,

    /// Include the event target in each line
    pub with_target: bool,
}

impl LoggingConfig {
    /// Validate the logging configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.level.to_lowercase().as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.level.clone()));
        }

        let valid_formats = ["json", "pretty", "compact"];
        if !valid_formats.contains(&self.format.to_lowercase().as_str()) {
            return Err(ConfigError::InvalidLogFormat(self.format.clone()));
        }

        Ok(())
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            with_target: true,
        }
    }
}
