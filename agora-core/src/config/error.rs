//! Errors raised while loading, overriding or checking the node configuration

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {source}", path.display())]
    Read { path: PathBuf, source: std::io::Error },

    #[error("Failed to write config file {}: {source}", path.display())]
    Write { path: PathBuf, source: std::io::Error },

    #[error("Malformed config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to encode config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// An `AGORA_*` override that doesn't parse into its field
    #[error("Environment override {var}: {reason}")]
    InvalidEnvVar { var: String, reason: String },

    /// A value that parsed but can't run a node, e.g. a zero TTL
    #[error("Invalid [{section}] setting: {reason}")]
    Invalid { section: &'static str, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(section: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid { section, reason: reason.into() }
    }
}
