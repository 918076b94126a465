//! Gossip layer: wire messages, capability-gated fan-out and inbound handling
//!
//! The transport itself (connections, encryption, peer discovery) lives outside
//! this crate; it hands us frames plus the sending peer's id and drains the
//! per-peer outbound queues we fill.

pub mod broadcaster;
pub mod capability_gate;
pub mod handler;
pub mod message;
pub mod peer;

pub use broadcaster::{BroadcastReport, Broadcaster, Outbound};
pub use capability_gate::CapabilityGate;
pub use handler::{GossipHandler, InboundOutcome, PublishError, PublishResult};
pub use message::{MessageId, NetworkMessage, WireError, DEFAULT_MAX_FRAME_SIZE, PROTOCOL_VERSION};
pub use peer::PeerId;
