//! Logging subsystem for agora-core
//!
//! Everything in the crate logs through `tracing` macros with structured fields
//! (`key = %key`, `peer = %peer`, ...). This module only installs the subscriber:
//! an `EnvFilter` (RUST_LOG wins over the configured level) plus a `fmt` layer,
//! optionally JSON.

use crate::config::LoggingConfig;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

mod error;
mod level;

pub use error::LoggingError;
pub use level::LogLevel;

/// Configuration for the logging subsystem
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// The minimum log level to display
    pub level: LogLevel,
    /// Whether to include timestamps
    pub with_timestamp: bool,
    /// Whether to include target module information
    pub with_target: bool,
    /// Whether to use JSON formatting
    pub json_format: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { level: LogLevel::Info, with_timestamp: true, with_target: true, json_format: false }
    }
}

impl LogConfig {
    /// Create a new LogConfig with specified level
    pub fn new(level: LogLevel) -> Self {
        Self { level, ..Default::default() }
    }

    /// Set whether to include timestamps
    pub fn with_timestamp(mut self, enabled: bool) -> Self {
        self.with_timestamp = enabled;
        self
    }

    /// Set whether to include target information
    pub fn with_target(mut self, enabled: bool) -> Self {
        self.with_target = enabled;
        self
    }

    /// Set whether to use JSON formatting
    pub fn json_format(mut self, enabled: bool) -> Self {
        self.json_format = enabled;
        self
    }
}

impl TryFrom<&LoggingConfig> for LogConfig {
    type Error = LoggingError;

    fn try_from(config: &LoggingConfig) -> Result<Self, Self::Error> {
        let level = config.level.parse::<LogLevel>()?;
        Ok(LogConfig::new(level)
            .with_timestamp(config.with_timestamp)
            .with_target(config.with_target)
            .json_format(config.json_format))
    }
}

/// Initialize the logging subsystem with default configuration
///
/// # Example
/// ```
/// use agora_core::logging::init_logging;
///
/// init_logging().expect("Failed to initialize logging");
/// ```
pub fn init_logging() -> Result<(), LoggingError> {
    init_logging_with_config(LogConfig::default())
}

/// Initialize the logging subsystem with custom configuration
///
/// Fails if a global subscriber is already installed.
///
/// # Example
/// ```
/// use agora_core::logging::{init_logging_with_config, LogConfig, LogLevel};
///
/// let config = LogConfig::new(LogLevel::Debug)
///     .with_timestamp(true)
///     .with_target(false);
///
/// init_logging_with_config(config).expect("Failed to initialize logging");
/// ```
pub fn init_logging_with_config(config: LogConfig) -> Result<(), LoggingError> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str()));

    let target = config.with_target;
    let fmt_layer = match (config.json_format, config.with_timestamp) {
        (true, true) => fmt::layer().json().with_target(target).boxed(),
        (true, false) => fmt::layer().json().without_time().with_target(target).boxed(),
        (false, true) => fmt::layer().with_target(target).boxed(),
        (false, false) => fmt::layer().without_time().with_target(target).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| LoggingError::InitializationFailed(e.to_string()))
}
