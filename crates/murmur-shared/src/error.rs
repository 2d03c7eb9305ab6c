//! Error taxonomy for the reconciliation layer.
//!
//! All variants are `Clone` because results flow through shared
//! single-flight futures: every coalesced waiter receives its own copy
//! of the outcome.

use thiserror::Error;

/// Failures resolving a content identifier against the blob store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContentError {
    #[error("content {0} not found in store")]
    NotFound(String),

    /// Permanent for the identifier: content addressing means a refetch
    /// would yield the same bytes.
    #[error("content {id} is malformed: {reason}")]
    Malformed { id: String, reason: String },

    #[error("content store unavailable: {0}")]
    Unavailable(String),
}

impl ContentError {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable(reason.into())
    }

    /// Whether a caller-triggered retry could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Failures on ledger point reads.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("ledger has no record for {0}")]
    NotFound(String),

    /// The ledger returned a shape that does not match the fixed record
    /// schema. Failing fast here keeps ambiguous data out of the UI.
    #[error("ledger record {key} is malformed: {reason}")]
    Malformed { key: String, reason: String },

    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

impl LedgerError {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable(reason.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// A ledger write that was rejected or failed to settle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("transaction failed: {message}{}", if *.retryable { " (retryable)" } else { "" })]
pub struct TxError {
    pub message: String,
    /// Whether resubmitting the same transaction could succeed
    /// (network timeout: yes; rejected by the signer: no).
    pub retryable: bool,
}

impl TxError {
    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }
}

/// Failures surfaced by the mutation coordinator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MutationError {
    /// Local validation failure; no network call was made.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Content upload failed; the ledger was never contacted.
    #[error("content upload failed: {0}")]
    Storage(#[from] ContentError),

    #[error(transparent)]
    Transaction(#[from] TxError),

    /// A mutation for the same (kind, key) is already in flight.
    #[error("a {0} mutation for this target is already in flight")]
    AlreadyInFlight(&'static str),
}

impl MutationError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Validation(_) | Self::AlreadyInFlight(_) => false,
            Self::Storage(e) => e.is_retryable(),
            Self::Transaction(e) => e.retryable,
        }
    }
}

/// Umbrella error for the client facade.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Content(#[from] ContentError),

    #[error(transparent)]
    Mutation(#[from] MutationError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryability() {
        assert!(ContentError::unavailable("timeout").is_retryable());
        assert!(!ContentError::NotFound("c".into()).is_retryable());
        assert!(TxError::transient("timeout").retryable);
        assert!(!TxError::rejected("user declined").retryable);
        assert!(!MutationError::Validation("empty".into()).is_retryable());
        assert!(MutationError::Storage(ContentError::unavailable("io")).is_retryable());
    }

    #[test]
    fn test_tx_error_display() {
        let e = TxError::transient("timed out");
        assert_eq!(e.to_string(), "transaction failed: timed out (retryable)");
        let e = TxError::rejected("declined");
        assert_eq!(e.to_string(), "transaction failed: declined");
    }
}
