//! # Proto Core Configuration
//!
//! This crate provides configuration parsing for the Proto Core world-state
//! synchronizer and the tracing setup that goes with it.
//!
//! All settings live in one `protocore.toml` file. Every section is optional
//! and falls back to its defaults.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use protocore_config::{init_tracing, Config};
//! use std::path::Path;
//!
//! let config = Config::load(Path::new("protocore.toml"))?;
//! init_tracing(&config.logging)?;
//!
//! println!("Parallelism: {}", config.sync.world_state_request_parallelism);
//! ```
//!
//! ## Configuration Sections
//!
//! - `[sync]` - World-state download and trailing-peer policy
//! - `[logging]` - Logging settings (level, format)

mod config;
mod error;
mod logging;

pub use config::*;
pub use error::*;
pub use logging::init_tracing;
