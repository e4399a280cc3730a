//! Tracing subscriber setup

use crate::config::LoggingConfig;
use crate::error::{ConfigError, ConfigResult};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global tracing subscriber described by `config`.
///
/// `RUST_LOG` takes precedence over the configured level.
pub fn init_tracing(config: &LoggingConfig) -> ConfigResult<()> {
    config.validate()?;

    let default_filter = format!(
        "{level},protocore={level}",
        level = config.level.to_lowercase()
    );
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = match config.format.to_lowercase().as_str() {
        "json" => registry
            .with(fmt::layer().json().with_target(config.with_target))
            .try_init(),
        "compact" => registry
            .with(fmt::layer().compact().with_target(config.with_target))
            .try_init(),
        _ => registry
            .with(fmt::layer().with_target(config.with_target))
            .try_init(),
    };

    result.map_err(|e| ConfigError::TracingInit(e.to_string()))
}
