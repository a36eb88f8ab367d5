//! Position state manager error types.

use keeper_domain::PositionId;
use keeper_store::StoreError;
use thiserror::Error;

/// Errors surfaced by the position state manager.
#[derive(Debug, Error)]
pub enum ManagerError {
    /// Caller supplied invalid arguments; never retried
    #[error("Validation error: {0}")]
    Validation(String),

    /// Position unknown, or already closed for a mutating call
    #[error("Position not found: {0}")]
    NotFound(PositionId),

    /// Transaction could not commit; caller may retry with backoff
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
}

impl From<keeper_domain::DomainError> for ManagerError {
    fn from(err: keeper_domain::DomainError) -> Self {
        ManagerError::Validation(err.to_string())
    }
}

/// Result type for manager operations.
pub type ManagerResult<T> = Result<T, ManagerError>;
