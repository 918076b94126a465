//! Rejection reasons and engine errors

use crate::core_payload::PayloadError;
use crate::core_store::StoreError;
use thiserror::Error;

/// Why a single inbound or local operation was refused.
///
/// Terminal for that message only: it is logged, counted and dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RejectReason {
    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Stale sequence number: received {received}, stored {stored}")]
    StaleSequenceNumber { received: u64, stored: u64 },

    #[error("Sequence number {0} already used for different content")]
    ConflictingSequenceNumber(u64),

    #[error("Signer does not own the entry")]
    OwnerMismatch,

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Add-once payload was already removed")]
    PreviouslyRemoved,

    #[error("Entry already expired")]
    Expired,

    #[error("Persisted data not loaded yet")]
    NotReady,
}

impl RejectReason {
    /// Stable label for metrics
    pub fn as_label(&self) -> &'static str {
        match self {
            RejectReason::InvalidSignature => "invalid_signature",
            RejectReason::StaleSequenceNumber { .. } => "stale_sequence_number",
            RejectReason::ConflictingSequenceNumber(_) => "conflicting_sequence_number",
            RejectReason::OwnerMismatch => "owner_mismatch",
            RejectReason::MalformedPayload(_) => "malformed_payload",
            RejectReason::PreviouslyRemoved => "previously_removed",
            RejectReason::Expired => "expired",
            RejectReason::NotReady => "not_ready",
        }
    }
}

impl From<PayloadError> for RejectReason {
    fn from(err: PayloadError) -> Self {
        RejectReason::MalformedPayload(err.to_string())
    }
}

/// Errors returned by the storage engine
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("Rejected: {0}")]
    Rejected(#[from] RejectReason),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl StorageError {
    pub fn reject_reason(&self) -> Option<&RejectReason> {
        match self {
            StorageError::Rejected(reason) => Some(reason),
            StorageError::Store(_) => None,
        }
    }
}

impl From<PayloadError> for StorageError {
    fn from(err: PayloadError) -> Self {
        StorageError::Rejected(err.into())
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reject_reason_display() {
        let err = RejectReason::StaleSequenceNumber { received: 1, stored: 2 };
        assert_eq!(err.to_string(), "Stale sequence number: received 1, stored 2");
        assert_eq!(err.as_label(), "stale_sequence_number");
    }

    #[test]
    fn test_payload_error_becomes_malformed() {
        let err: StorageError = PayloadError::TooLarge { size: 10, max: 5 }.into();
        assert!(matches!(err.reject_reason(), Some(RejectReason::MalformedPayload(_))));
    }

    #[test]
    fn test_store_error_has_no_reason() {
        let err: StorageError = StoreError::Internal("boom".to_string()).into();
        assert!(err.reject_reason().is_none());
    }
}
