//! Daemon error types.

use keeper_exchange::ExchangeError;
use keeper_manager::ManagerError;
use keeper_store::StoreError;
use thiserror::Error;

/// Daemon-level errors.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Position manager error
    #[error("Manager error: {0}")]
    Manager(#[from] ManagerError),

    /// Exchange boundary error
    #[error("Exchange error: {0}")]
    Exchange(#[from] ExchangeError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for daemon operations.
pub type DaemonResult<T> = Result<T, DaemonError>;
