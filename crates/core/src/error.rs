//! Ledger error model.

use thiserror::Error;

/// Result type used by the domain and the balance engine.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Failure taxonomy shared by every ledger operation.
///
/// The engine returns these as-is; mapping to transport status codes happens at
/// the API boundary.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// A referenced user, wallet or transaction does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The request is well-formed but violates a business rule
    /// (non-positive amount, insufficient funds, same-wallet transfer).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The request collides with existing state (duplicate wallet, user).
    #[error("conflict: {0}")]
    Conflict(String),

    /// The store failed to read or commit.
    #[error("storage failure: {0}")]
    StorageFailure(String),
}

impl LedgerError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::StorageFailure(msg.into())
    }

    /// Human-readable message without the category prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::NotFound(msg)
            | Self::InvalidArgument(msg)
            | Self::Conflict(msg)
            | Self::StorageFailure(msg) => msg,
        }
    }
}
