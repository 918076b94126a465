/*
    core_store - Persistent store services backing the replicated data store

    Handles:
    - Snapshot persistence with one writer task per store
    - Map stores for protected entries (one per protected kind)
    - Append-only historical stores for persistable payloads
    - The persisted data host registry (load all, signal ready, flush all)
*/

pub mod errors;
pub mod historical_store;
pub mod map_store;
pub mod persistence;
pub mod registry;
pub mod table;

// Re-export commonly used types
pub use errors::{StoreError, StoreResult};
pub use historical_store::{HistoricalMutation, HistoricalStoreService, HistoricalStoreState};
pub use map_store::{
    MapStoreMutation, MapStoreOptions, MapStoreService, MapStoreState, MapStoreWriter, SequenceRecord,
};
pub use persistence::{decode_snapshot, PersistableState, PersistenceHandle, PersistenceManager, PersistenceOptions};
pub use registry::{PersistedDataHost, StoreRegistry};
pub use table::StoreTable;
