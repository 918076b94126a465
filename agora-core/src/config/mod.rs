//! Configuration management for agora-core
//!
//! This module provides environment-based configuration management with
//! support for defaults, TOML files and validation.

use crate::core_payload::ProtectedKind;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

mod error;

pub use error::ConfigError;

/// Main node configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Replicated store configuration
    pub storage: StorageConfig,

    /// Expiry sweeper configuration
    pub sweeper: SweeperConfig,

    /// Gossip broadcast configuration
    pub broadcast: BroadcastConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Metrics configuration
    pub metrics: MetricsConfig,

    /// Graceful shutdown configuration
    pub shutdown: ShutdownConfig,
}

/// Replicated store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding one `<kind>.store` file per store
    pub data_dir: PathBuf,

    /// Maximum encoded payload size in bytes
    pub max_payload_size: usize,

    /// How far in the future a trade statistics date may lie
    #[serde(with = "humantime_serde")]
    pub date_tolerance: Duration,

    /// Age after which sequence records of dead keys are dropped on load
    #[serde(with = "humantime_serde")]
    pub sequence_purge_age: Duration,

    /// Retry delay after a failed snapshot write
    #[serde(with = "humantime_serde")]
    pub persist_retry_delay: Duration,

    /// Upper bound of a snapshot file accepted on load
    pub max_snapshot_size: usize,

    /// Time-to-live per protected kind
    pub ttl: TtlConfig,
}

/// Time-to-live of each protected payload kind
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TtlConfig {
    #[serde(with = "humantime_serde")]
    pub offer: Duration,

    #[serde(with = "humantime_serde")]
    pub dispute_agent: Duration,

    #[serde(with = "humantime_serde")]
    pub mailbox: Duration,
}

/// Expiry sweeper configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SweeperConfig {
    /// Interval between two sweeps
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
}

/// Gossip broadcast configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastConfig {
    /// Number of message ids remembered for duplicate suppression
    pub dedup_capacity: usize,

    /// How long a broadcast message id suppresses an identical one
    #[serde(with = "humantime_serde")]
    pub dedup_window: Duration,

    /// Largest inbound frame accepted
    pub max_frame_size: usize,

    /// Outbound queue length per peer
    pub peer_queue_size: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Enable JSON formatting
    pub json_format: bool,

    /// Include timestamps
    pub with_timestamp: bool,

    /// Include target module
    pub with_target: bool,
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Describe metrics to the installed recorder at startup
    pub enabled: bool,
}

/// Graceful shutdown configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// How long shutdown waits for background tasks
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            max_payload_size: 20 * 1024,
            date_tolerance: Duration::from_secs(24 * 3600),
            sequence_purge_age: Duration::from_secs(10 * 24 * 3600),
            persist_retry_delay: Duration::from_secs(5),
            max_snapshot_size: 512 * 1024 * 1024, // 512 MB
            ttl: TtlConfig::default(),
        }
    }
}

impl Default for TtlConfig {
    fn default() -> Self {
        Self {
            offer: ProtectedKind::Offer.default_ttl(),
            dispute_agent: ProtectedKind::DisputeAgent.default_ttl(),
            mailbox: ProtectedKind::Mailbox.default_ttl(),
        }
    }
}

impl TtlConfig {
    pub fn for_kind(&self, kind: ProtectedKind) -> Duration {
        match kind {
            ProtectedKind::Offer => self.offer,
            ProtectedKind::DisputeAgent => self.dispute_agent,
            ProtectedKind::Mailbox => self.mailbox,
        }
    }
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self { interval: Duration::from_secs(60) }
    }
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            dedup_capacity: 10_000,
            dedup_window: Duration::from_secs(60),
            max_frame_size: 1024 * 1024, // 1 MB
            peer_queue_size: 256,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            with_timestamp: true,
            with_target: true,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self { timeout: Duration::from_secs(10) }
    }
}

fn parse_var<T>(name: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidEnvVar { var: name.to_string(), reason: e.to_string() }),
        Err(_) => Ok(None),
    }
}

fn parse_duration_var(name: &str) -> Result<Option<Duration>, ConfigError> {
    match env::var(name) {
        Ok(raw) => humantime_serde::re::humantime::parse_duration(&raw)
            .map(Some)
            .map_err(|e| ConfigError::InvalidEnvVar { var: name.to_string(), reason: e.to_string() }),
        Err(_) => Ok(None),
    }
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Environment variables follow the pattern: AGORA_<SECTION>_<KEY>
    /// Example: AGORA_STORAGE_DATA_DIR=/var/lib/agora
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        // Storage config
        if let Ok(data_dir) = env::var("AGORA_STORAGE_DATA_DIR") {
            config.storage.data_dir = PathBuf::from(data_dir);
        }
        if let Some(size) = parse_var("AGORA_STORAGE_MAX_PAYLOAD_SIZE")? {
            config.storage.max_payload_size = size;
        }
        if let Some(tolerance) = parse_duration_var("AGORA_STORAGE_DATE_TOLERANCE")? {
            config.storage.date_tolerance = tolerance;
        }
        if let Some(age) = parse_duration_var("AGORA_STORAGE_SEQUENCE_PURGE_AGE")? {
            config.storage.sequence_purge_age = age;
        }
        if let Some(delay) = parse_duration_var("AGORA_STORAGE_PERSIST_RETRY_DELAY")? {
            config.storage.persist_retry_delay = delay;
        }
        if let Some(ttl) = parse_duration_var("AGORA_STORAGE_TTL_OFFER")? {
            config.storage.ttl.offer = ttl;
        }
        if let Some(ttl) = parse_duration_var("AGORA_STORAGE_TTL_DISPUTE_AGENT")? {
            config.storage.ttl.dispute_agent = ttl;
        }
        if let Some(ttl) = parse_duration_var("AGORA_STORAGE_TTL_MAILBOX")? {
            config.storage.ttl.mailbox = ttl;
        }

        // Sweeper config
        if let Some(interval) = parse_duration_var("AGORA_SWEEPER_INTERVAL")? {
            config.sweeper.interval = interval;
        }

        // Broadcast config
        if let Some(capacity) = parse_var("AGORA_BROADCAST_DEDUP_CAPACITY")? {
            config.broadcast.dedup_capacity = capacity;
        }
        if let Some(window) = parse_duration_var("AGORA_BROADCAST_DEDUP_WINDOW")? {
            config.broadcast.dedup_window = window;
        }
        if let Some(size) = parse_var("AGORA_BROADCAST_MAX_FRAME_SIZE")? {
            config.broadcast.max_frame_size = size;
        }
        if let Some(size) = parse_var("AGORA_BROADCAST_PEER_QUEUE_SIZE")? {
            config.broadcast.peer_queue_size = size;
        }

        // Logging config
        if let Ok(level) = env::var("AGORA_LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Some(json) = parse_var("AGORA_LOG_JSON")? {
            config.logging.json_format = json;
        }

        // Metrics config
        if let Some(enabled) = parse_var("AGORA_METRICS_ENABLED")? {
            config.metrics.enabled = enabled;
        }

        if let Some(timeout) = parse_duration_var("AGORA_SHUTDOWN_TIMEOUT")? {
            config.shutdown.timeout = timeout;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;

        let config: Self = toml::from_str(&contents)?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Validate storage config
        if self.storage.max_payload_size == 0 {
            return Err(ConfigError::invalid("storage", "max_payload_size must be greater than 0"));
        }

        if self.storage.max_snapshot_size == 0 {
            return Err(ConfigError::invalid("storage", "max_snapshot_size must be greater than 0"));
        }

        for kind in ProtectedKind::ALL {
            if self.storage.ttl.for_kind(kind).is_zero() {
                return Err(ConfigError::invalid(
                    "storage.ttl",
                    format!("{} must be greater than 0", kind.as_str()),
                ));
            }
        }

        // Validate sweeper config
        if self.sweeper.interval.is_zero() {
            return Err(ConfigError::invalid("sweeper", "interval must be greater than 0"));
        }

        // Validate broadcast config
        if self.broadcast.dedup_capacity == 0 {
            return Err(ConfigError::invalid("broadcast", "dedup_capacity must be greater than 0"));
        }

        if self.broadcast.peer_queue_size == 0 {
            return Err(ConfigError::invalid("broadcast", "peer_queue_size must be greater than 0"));
        }

        if self.broadcast.max_frame_size < self.storage.max_payload_size {
            return Err(ConfigError::invalid(
                "broadcast",
                format!(
                    "max_frame_size ({}) must not be smaller than max_payload_size ({})",
                    self.broadcast.max_frame_size, self.storage.max_payload_size
                ),
            ));
        }

        // Validate logging config
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::invalid(
                "logging",
                format!("unknown level {}", self.logging.level),
            ));
        }

        Ok(())
    }

    /// Save configuration to file
    pub fn save_to_file(&self, path: impl AsRef<std::path::Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let contents = toml::to_string_pretty(self)?;

        std::fs::write(path, contents)
            .map_err(|source| ConfigError::Write { path: path.to_path_buf(), source })?;

        Ok(())
    }
}
