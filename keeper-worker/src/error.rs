//! Worker boundary error types.

use keeper_domain::PositionId;
use keeper_exchange::ExchangeError;
use keeper_manager::ManagerError;
use thiserror::Error;

/// Errors surfaced to strategy code through the worker context.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// Exchange boundary error (rate limit, venue rejection, outage)
    #[error("Exchange error: {0}")]
    Exchange(#[from] ExchangeError),

    /// Position store error
    #[error("Manager error: {0}")]
    Manager(#[from] ManagerError),

    /// The position belongs to a different worker
    #[error("Position {0} is owned by another worker")]
    NotOwner(PositionId),
}

/// Result type for worker operations.
pub type WorkerResult<T> = Result<T, WorkerError>;
