//! Error types for ledger operations
//!
//! One taxonomy shared by every crate in the workspace. Callers branch on
//! variants, not on message text; `code()` gives the stable identifier
//! written into logs and audit details.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::{ContestId, UserId};

/// Main error type for wallet, contest and payment operations
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Input rejected before any state was touched
    #[error("Validation error: {message}")]
    Validation { message: String },

    /// Referenced entity does not exist
    #[error("Not found: {resource}")]
    NotFound { resource: String },

    /// Combined buckets cannot cover the requested amount
    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds {
        required: Decimal,
        available: Decimal,
    },

    /// Cancellation attempted on a settled contest
    #[error("Contest {contest_id} is already settled")]
    AlreadySettled { contest_id: ContestId },

    /// Settlement attempted on a cancelled contest
    #[error("Contest {contest_id} is already cancelled")]
    AlreadyCancelled { contest_id: ContestId },

    /// Second join by the same user
    #[error("User {user_id} already joined contest {contest_id}")]
    AlreadyJoined {
        contest_id: ContestId,
        user_id: UserId,
    },

    /// Status change not permitted by the transition table
    #[error("Invalid {kind} transition: {from} -> {to}")]
    InvalidTransition {
        kind: &'static str,
        from: &'static str,
        to: &'static str,
    },

    /// Webhook signature did not verify
    #[error("Signature rejected: {message}")]
    Signature { message: String },

    /// On-chain verification failed or disagreed with the claim
    #[error("Verification failed: {message}")]
    Verification { message: String },

    /// Lost a lock or uniqueness race; safe to retry
    #[error("Conflict: {message}")]
    Conflict { message: String },

    /// Database or cache failure
    #[error("Storage error: {message}")]
    Storage { message: String },
}

impl LedgerError {
    /// Create a validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a not found error
    pub fn not_found<S: Into<String>>(resource: S) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    /// Create an insufficient funds error
    pub fn insufficient_funds(required: Decimal, available: Decimal) -> Self {
        Self::InsufficientFunds {
            required,
            available,
        }
    }

    /// Create a signature error
    pub fn signature<S: Into<String>>(message: S) -> Self {
        Self::Signature {
            message: message.into(),
        }
    }

    /// Create a verification error
    pub fn verification<S: Into<String>>(message: S) -> Self {
        Self::Verification {
            message: message.into(),
        }
    }

    /// Create a conflict error
    pub fn conflict<S: Into<String>>(message: S) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Create a storage error
    pub fn storage<S: Into<String>>(message: S) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Stable identifier for logs and audit details
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::Validation { .. } => "VALIDATION",
            LedgerError::NotFound { .. } => "NOT_FOUND",
            LedgerError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            LedgerError::AlreadySettled { .. } => "ALREADY_SETTLED",
            LedgerError::AlreadyCancelled { .. } => "ALREADY_CANCELLED",
            LedgerError::AlreadyJoined { .. } => "ALREADY_JOINED",
            LedgerError::InvalidTransition { .. } => "INVALID_TRANSITION",
            LedgerError::Signature { .. } => "SIGNATURE",
            LedgerError::Verification { .. } => "VERIFICATION",
            LedgerError::Conflict { .. } => "CONFLICT",
            LedgerError::Storage { .. } => "STORAGE",
        }
    }

    /// Whether retrying the same call can succeed without operator action
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LedgerError::Conflict { .. } | LedgerError::Storage { .. }
        )
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        LedgerError::Storage {
            message: format!("serialization error: {err}"),
        }
    }
}

/// Type alias for ledger results
pub type LedgerResult<T> = Result<T, LedgerError>;
