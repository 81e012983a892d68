//! Configuration management for transferd
//!
//! This module provides a layered configuration system that loads settings from:
//! 1. Default values (embedded in structs)
//! 2. TOML configuration file
//! 3. Environment variables (highest priority)
//!
//! # Usage
//!
//! ```no_run
//! use transferd::config::Config;
//!
//! let config = Config::load().expect("Failed to load configuration");
//! println!("Running {} workers", config.workers.count);
//! ```
//!
//! # Environment Variables
//!
//! Configuration can be overridden using environment variables with the pattern:
//! `TRANSFERD__<section>__<key>`
//!
//! Examples:
//! - `TRANSFERD__WORKERS__COUNT=8`
//! - `TRANSFERD__DOWNLOADER__TARGET_DIR=/srv/media`
//! - `TRANSFERD__DOWNLOADER__MIN_SPLIT_SIZE=4MB`
//!
//! # Configuration File
//!
//! By default, the configuration is loaded from `config/transferd.toml`.
//! This can be overridden using the `TRANSFERD_CONFIG` environment variable.

mod models;
mod sources;
mod validation;

pub use crate::humanize::ByteSize;
pub use models::{
    Config, DashboardConfig, DownloaderConfig, TelemetryConfig, TransfersConfig, WorkerPoolConfig,
};
pub use validation::ValidationError;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Configuration validation failed: {0}")]
    ValidationError(#[from] ValidationError),
}

impl Config {
    /// Load configuration from all sources (file + environment)
    ///
    /// Configuration is loaded with the following priority (highest to lowest):
    /// 1. Environment variables (`TRANSFERD__*`)
    /// 2. TOML file (default: `config/transferd.toml`)
    /// 3. Default values
    pub fn load() -> Result<Self, ConfigError> {
        let config = sources::load()?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: std::path::PathBuf) -> Result<Self, ConfigError> {
        let config = sources::load_from_sources(path)?;
        validation::validate(&config)?;
        Ok(config)
    }
}
