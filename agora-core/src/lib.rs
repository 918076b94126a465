pub mod config;
pub mod core_gossip;
pub mod core_payload;
pub mod core_storage;
pub mod core_store;
pub mod logging;
pub mod metrics;
pub mod shutdown;
pub mod test_utils;

pub use config::Config;
pub use core_gossip::{GossipHandler, InboundOutcome, NetworkMessage, PeerId};
pub use core_payload::{Keypair, PersistablePayload, ProtectedPayload, StorageEntry, StorageKey};
pub use core_storage::{DataStorage, RejectReason, StorageNode};
pub use logging::{init_logging, LogLevel};
