//! Exchange port definitions.
//!
//! The venue port is the seam below which concrete protocol details
//! (REST endpoints, authentication, symbol naming) live. Everything above
//! it sees four operations.
//!
//! Implementations:
//! - `StubVenue` - for testing (immediate fills at configured prices)
//! - `BinanceVenue` - Binance isolated margin REST

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use keeper_domain::{ExchangePosition, OrderSide, Price, Quantity, Symbol};

use crate::error::ExchangeError;

/// Order types supported at the venue boundary.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderType {
    /// Market order (immediate execution)
    Market,
    /// Limit order at the given price
    Limit { price: Price },
}

/// A confirmed fill reported by the venue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueFill {
    /// Venue-assigned order ID
    pub venue_order_id: String,
    /// Actual fill price
    pub fill_price: Price,
    /// Actual filled quantity
    pub filled_quantity: Quantity,
    /// When the order was filled
    pub filled_at: DateTime<Utc>,
}

/// Port for raw venue operations.
///
/// Implementations perform exactly one network interaction per call: the
/// adapter above owns rate limiting, retries, and fill recording.
#[async_trait]
pub trait VenuePort: Send + Sync {
    /// Place an order. One attempt, no retry: a duplicate submission could
    /// double-fill.
    async fn place_order(
        &self,
        symbol: &Symbol,
        side: OrderSide,
        quantity: Quantity,
        order_type: &OrderType,
    ) -> Result<VenueFill, ExchangeError>;

    /// Positions the venue currently reports for this account.
    ///
    /// Reconciliation input; read-only and safe to retry.
    async fn get_open_positions(&self) -> Result<Vec<ExchangePosition>, ExchangeError>;

    /// Current price for a symbol.
    async fn get_ticker(&self, symbol: &Symbol) -> Result<Price, ExchangeError>;

    /// Best-effort cancel. A new request to the venue, not a true abort:
    /// the order may already have filled.
    async fn cancel_order(&self, symbol: &Symbol, order_id: &str) -> Result<(), ExchangeError>;
}

// =============================================================================
// Tests
// =============================================================================
