//! Stub venue for testing.
//!
//! Simulates immediate fills at configured prices without network calls,
//! with switches to inject transient failures and venue rejections.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;

use keeper_domain::{ExchangePosition, OrderSide, Price, Quantity, Symbol};

use crate::error::ExchangeError;
use crate::ports::{OrderType, VenueFill, VenuePort};

/// An order the stub accepted (for test assertions).
#[derive(Debug, Clone)]
pub struct PlacedOrder {
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
}

/// Stub venue: fills orders instantly at the configured price.
pub struct StubVenue {
    /// Current prices by symbol
    prices: RwLock<HashMap<String, Decimal>>,
    /// Default price for unknown symbols
    default_price: Decimal,
    /// Positions reported by `get_open_positions`
    positions: RwLock<Vec<ExchangePosition>>,
    /// Orders accepted so far
    placed: RwLock<Vec<PlacedOrder>>,
    /// Order counter for generating IDs
    order_counter: AtomicU32,
    /// Total network attempts (including failed ones)
    calls: AtomicU32,
    /// Fail the next call with `Unavailable`
    fail_next: RwLock<bool>,
    /// Fail every call with `Unavailable`
    fail_always: RwLock<bool>,
    /// Reject the next order with this reason
    reject_next: RwLock<Option<String>>,
}

impl StubVenue {
    /// Create a stub with a default fill price.
    pub fn new(default_price: Decimal) -> Self {
        Self {
            prices: RwLock::new(HashMap::new()),
            default_price,
            positions: RwLock::new(Vec::new()),
            placed: RwLock::new(Vec::new()),
            order_counter: AtomicU32::new(0),
            calls: AtomicU32::new(0),
            fail_next: RwLock::new(false),
            fail_always: RwLock::new(false),
            reject_next: RwLock::new(None),
        }
    }

    /// Set the price for a specific symbol.
    pub fn set_price(&self, symbol: &str, price: Decimal) {
        self.prices.write().unwrap().insert(symbol.to_string(), price);
    }

    /// Set the positions the venue reports.
    pub fn set_positions(&self, positions: Vec<ExchangePosition>) {
        *self.positions.write().unwrap() = positions;
    }

    /// Make the next call fail with `Unavailable`.
    pub fn fail_next(&self) {
        *self.fail_next.write().unwrap() = true;
    }

    /// Make every call fail with `Unavailable`.
    pub fn fail_always(&self) {
        *self.fail_always.write().unwrap() = true;
    }

    /// Reject the next order with the given venue reason.
    pub fn reject_next(&self, reason: &str) {
        *self.reject_next.write().unwrap() = Some(reason.to_string());
    }

    /// Total network attempts seen, including failed ones.
    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Orders accepted so far.
    pub fn placed_orders(&self) -> Vec<PlacedOrder> {
        self.placed.read().unwrap().clone()
    }

    fn price_for(&self, symbol: &str) -> Decimal {
        self.prices.read().unwrap().get(symbol).copied().unwrap_or(self.default_price)
    }

    /// Count the attempt and decide whether it fails.
    fn tick(&self) -> Result<(), ExchangeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if *self.fail_always.read().unwrap() {
            return Err(ExchangeError::Unavailable("stub: permanent failure".to_string()));
        }

        let mut fail_next = self.fail_next.write().unwrap();
        if *fail_next {
            *fail_next = false;
            return Err(ExchangeError::Unavailable("stub: simulated failure".to_string()));
        }

        Ok(())
    }
}

#[async_trait]
impl VenuePort for StubVenue {
    async fn place_order(
        &self,
        symbol: &Symbol,
        side: OrderSide,
        quantity: Quantity,
        order_type: &OrderType,
    ) -> Result<VenueFill, ExchangeError> {
        self.tick()?;

        if let Some(reason) = self.reject_next.write().unwrap().take() {
            return Err(ExchangeError::OrderRejected(reason));
        }

        let price = match order_type {
            OrderType::Market => self.price_for(&symbol.as_pair()),
            OrderType::Limit { price } => price.as_decimal(),
        };

        let order_id = self.order_counter.fetch_add(1, Ordering::SeqCst) + 1;

        self.placed.write().unwrap().push(PlacedOrder {
            symbol: symbol.as_pair(),
            side,
            quantity: quantity.as_decimal(),
        });

        Ok(VenueFill {
            venue_order_id: format!("STUB-{}", order_id),
            fill_price: Price::new(price)
                .map_err(|e| ExchangeError::InvalidResponse(e.to_string()))?,
            filled_quantity: quantity,
            filled_at: Utc::now(),
        })
    }

    async fn get_open_positions(&self) -> Result<Vec<ExchangePosition>, ExchangeError> {
        self.tick()?;
        Ok(self.positions.read().unwrap().clone())
    }

    async fn get_ticker(&self, symbol: &Symbol) -> Result<Price, ExchangeError> {
        self.tick()?;
        Price::new(self.price_for(&symbol.as_pair()))
            .map_err(|e| ExchangeError::InvalidResponse(e.to_string()))
    }

    async fn cancel_order(&self, _symbol: &Symbol, order_id: &str) -> Result<(), ExchangeError> {
        self.tick()?;
        tracing::debug!(order_id, "Stub: order cancelled");
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
