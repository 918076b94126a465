/*
    StorageKey - content hash used as the key of every storage map

    Responsibilities:
    `storage_key.rs` defines the 256-bit digest both payload families are keyed by.
    Protected payloads are keyed by the hash of their canonical encoding (not by an
    externally assigned id), persistable payloads by the hash of their bytes. One key
    type lets the engine use the same map abstraction for offers, mailbox messages
    and trade statistics.

    Inputs:
    - canonical payload bytes
    - (payload bytes, sequence number) pairs for signing

    Outputs:
    - 256-bit keys
    - hex renderings for logs
*/

use serde::{Deserialize, Serialize};
use std::fmt;

/// 256-bit BLAKE3 digest identifying a stored payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StorageKey([u8; 32]);

impl StorageKey {
    /// Create a StorageKey from raw 32 bytes
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        StorageKey(bytes)
    }

    /// Hash arbitrary data
    pub fn hash(data: &[u8]) -> Self {
        StorageKey(*blake3::hash(data).as_bytes())
    }

    /// Hash several byte ranges as if they were concatenated
    pub fn hash_parts(parts: &[&[u8]]) -> Self {
        let mut hasher = blake3::Hasher::new();
        for part in parts {
            hasher.update(part);
        }
        StorageKey(*hasher.finalize().as_bytes())
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Full hex encoding (Display only shows a prefix)
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // first 8 bytes are enough to tell entries apart in logs
        write!(f, "{}", hex::encode(&self.0[..8]))
    }
}

impl From<[u8; 32]> for StorageKey {
    fn from(bytes: [u8; 32]) -> Self {
        StorageKey(bytes)
    }
}

impl From<StorageKey> for [u8; 32] {
    fn from(key: StorageKey) -> Self {
        key.0
    }
}
