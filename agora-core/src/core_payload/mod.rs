/*
    core_payload - data model of the replicated store

    Pure value types: payload families, signed entries, keys and capabilities.
    Nothing in this module performs I/O.
*/

pub mod capability;
pub mod entry;
pub mod keys;
pub mod payload;
pub mod storage_key;

pub use capability::{Capabilities, Capability};
pub use entry::{
    data_and_seq_hash, ProtectedMailboxStorageEntry, ProtectedStorageEntry, RefreshOfferMessage,
    StorageEntry,
};
pub use keys::{EntrySignature, Keypair, OwnerKey};
pub use payload::{
    AccountAgeWitnessPayload, AgentRole, DisputeAgentPayload, MailboxPayload, OfferDirection,
    OfferPayload, PayloadError, PersistableKind, PersistablePayload, ProtectedKind,
    ProtectedPayload, SignedWitnessPayload, TradeStatisticsPayload, WITNESS_HASH_LEN,
};
pub use storage_key::StorageKey;
