/*
    core_storage - the replicated data store

    Handles:
    - Validation and application of add / remove / refresh (engine)
    - Periodic expiry of unrefreshed entries (sweeper)
    - Node assembly and lifecycle (node)
    - The clock every TTL decision is measured against
*/

pub mod clock;
pub mod engine;
pub mod error;
pub mod node;
pub mod sweeper;

pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{
    AddOutcome, DataStorage, PersistableOutcome, RefreshOutcome, RemoveOutcome, StorageEvent,
    StorageLimits,
};
pub use error::{RejectReason, StorageError, StorageResult};
pub use node::{NodeError, StorageNode};
pub use sweeper::ExpirySweeper;
