//! Peer identity as seen by the gossip layer

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque address of a connected peer, assigned by the transport
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(address: impl Into<String>) -> Self {
        PeerId(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(address: &str) -> Self {
        PeerId(address.to_string())
    }
}
