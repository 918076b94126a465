/*
    message.rs - Wire messages of the storage gossip protocol

    Frame layout:
        [protocol version: u32 big-endian][bincode body]

    The version is checked before any byte of the body is looked at; version 0
    and versions this build doesn't speak are rejected outright. Frames larger
    than the configured limit are rejected before decoding.
*/

use crate::core_payload::{
    Capabilities, PersistablePayload, RefreshOfferMessage, StorageEntry, StorageKey,
};
use bincode::Options;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Version of the storage message envelope
pub const PROTOCOL_VERSION: u32 = 1;

/// Default upper bound of an inbound frame
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

const VERSION_LEN: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    #[error("Frame of {0} bytes is too short for an envelope")]
    Truncated(usize),

    #[error("Unsupported protocol version {0}")]
    UnsupportedVersion(u32),

    #[error("Frame of {size} bytes exceeds limit of {max} bytes")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Malformed message body: {0}")]
    Malformed(String),

    #[error("Encoding error: {0}")]
    Encoding(String),
}

/// Storage messages exchanged between peers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkMessage {
    AddData(StorageEntry),
    RemoveData(StorageEntry),
    RefreshOffer(RefreshOfferMessage),
    AddPersistablePayload(PersistablePayload),
}

impl NetworkMessage {
    /// Capabilities a peer needs before we relay this message to it
    pub fn required_capabilities(&self) -> Capabilities {
        match self {
            NetworkMessage::AddData(entry) | NetworkMessage::RemoveData(entry) => {
                entry.protected_entry().payload.required_capabilities()
            }
            NetworkMessage::RefreshOffer(_) => Capabilities::new(),
            NetworkMessage::AddPersistablePayload(payload) => payload.required_capabilities(),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            NetworkMessage::AddData(_) => "add_data",
            NetworkMessage::RemoveData(_) => "remove_data",
            NetworkMessage::RefreshOffer(_) => "refresh_offer",
            NetworkMessage::AddPersistablePayload(_) => "add_persistable_payload",
        }
    }

    /// Encode into a versioned frame
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let body = body_options(usize::MAX)
            .serialize(self)
            .map_err(|e| WireError::Encoding(e.to_string()))?;

        let mut frame = Vec::with_capacity(VERSION_LEN + body.len());
        frame.extend_from_slice(&PROTOCOL_VERSION.to_be_bytes());
        frame.extend_from_slice(&body);
        Ok(frame)
    }

    /// Decode a frame produced by [`encode`](Self::encode)
    pub fn decode(frame: &[u8], max_frame_size: usize) -> Result<Self, WireError> {
        if frame.len() > max_frame_size {
            return Err(WireError::FrameTooLarge { size: frame.len(), max: max_frame_size });
        }
        if frame.len() < VERSION_LEN {
            return Err(WireError::Truncated(frame.len()));
        }

        let mut version = [0u8; VERSION_LEN];
        version.copy_from_slice(&frame[..VERSION_LEN]);
        let version = u32::from_be_bytes(version);
        if version == 0 || version != PROTOCOL_VERSION {
            return Err(WireError::UnsupportedVersion(version));
        }

        body_options(max_frame_size)
            .deserialize(&frame[VERSION_LEN..])
            .map_err(|e| WireError::Malformed(e.to_string()))
    }
}

fn body_options(limit: usize) -> impl Options {
    bincode::DefaultOptions::new().with_fixint_encoding().with_limit(limit as u64)
}

/// Identity of a message for broadcast deduplication: BLAKE3 of the frame body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageId(StorageKey);

impl MessageId {
    pub fn of_frame(frame: &[u8]) -> Self {
        let body = frame.get(VERSION_LEN..).unwrap_or_default();
        MessageId(StorageKey::hash(body))
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
