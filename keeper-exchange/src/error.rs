//! Exchange adapter error types.

use thiserror::Error;

/// Errors that can occur at the exchange boundary.
#[derive(Debug, Error)]
pub enum ExchangeError {
    /// Transient network/availability failure. Retried internally for
    /// read-only calls; surfaced for order placement (the caller decides
    /// whether retrying an order is safe).
    #[error("Exchange unavailable: {0}")]
    Unavailable(String),

    /// Venue-side rejection with the venue's reason string. Never retried.
    #[error("Order rejected: {0}")]
    OrderRejected(String),

    /// Local rate limiter tripped; back off and try again.
    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    /// Venue returned something we could not interpret. Not retried.
    #[error("Invalid venue response: {0}")]
    InvalidResponse(String),

    /// Failed to sign the request
    #[error("Signature error: {0}")]
    Signature(String),

    /// The fill could not be recorded in the position store. The order DID
    /// reach the venue; reconciliation will adopt the resulting position.
    #[error("Failed to record fill: {0}")]
    Recording(#[from] keeper_manager::ManagerError),
}

/// Result type for exchange operations.
pub type ExchangeResult<T> = Result<T, ExchangeError>;
