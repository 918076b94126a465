/*
    errors.rs - Error types for the store subsystem

    Defines the errors that can occur while:
    - reading or writing snapshot files
    - encoding store state
    - accessing shared in-memory maps
*/

use std::sync::PoisonError;
use thiserror::Error;

/// Errors that can occur in the store subsystem
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Reading or writing a store file failed
    #[error("Persistence I/O failure: {0}")]
    PersistenceIo(String),

    /// State could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Snapshot failed its header or checksum checks
    #[error("Corrupted data: {0}")]
    CorruptedData(String),

    /// A thread panicked while holding a store lock
    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::PersistenceIo(err.to_string())
    }
}

impl From<bincode::Error> for StoreError {
    fn from(err: bincode::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// Map a poisoned lock into a store error
pub(crate) fn handle_poison<T>(err: PoisonError<T>) -> StoreError {
    StoreError::LockPoisoned(err.to_string())
}
