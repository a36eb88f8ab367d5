//! Exchange adapter: the only path to the venue.
//!
//! Wraps a raw venue port with the three guarantees every caller relies on:
//!
//! - **Rate limiting**: every call draws from one process-wide limiter
//! - **Bounded retry**: transient failures are retried with exponential
//!   backoff for idempotent reads only; an order is submitted exactly once
//! - **Write-through fills**: a fill is recorded in the position store
//!   before the call returns success, so a worker can never believe an
//!   order succeeded that the store does not know about
//!
//! # Flow
//!
//! ```text
//! Worker Base → ExchangeAdapter → RateLimiter → VenuePort → FillSink (PSM)
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use keeper_domain::{ExchangePosition, Position, PositionId, Price, Quantity, Side, Symbol, WorkerId};
use keeper_manager::{ManagerError, PositionManager};

use crate::error::{ExchangeError, ExchangeResult};
use crate::ports::{OrderType, VenueFill, VenuePort};
use crate::rate_limit::RateLimiter;

// =============================================================================
// Fill sink
// =============================================================================

/// Where confirmed fills are recorded before the adapter reports success.
///
/// Implemented by the position state manager; tests substitute their own.
#[async_trait]
pub trait FillSink: Send + Sync {
    /// Record an entry fill as a new open position.
    async fn record_open_fill(
        &self,
        worker_id: WorkerId,
        symbol: Symbol,
        side: Side,
        fill: &VenueFill,
    ) -> Result<Position, ManagerError>;

    /// Record an exit fill, closing the position.
    async fn record_close_fill(
        &self,
        position_id: PositionId,
        fill: &VenueFill,
    ) -> Result<Position, ManagerError>;
}

#[async_trait]
impl FillSink for PositionManager {
    async fn record_open_fill(
        &self,
        worker_id: WorkerId,
        symbol: Symbol,
        side: Side,
        fill: &VenueFill,
    ) -> Result<Position, ManagerError> {
        self.open_position(
            worker_id,
            symbol,
            side,
            fill.filled_quantity.as_decimal(),
            fill.fill_price.as_decimal(),
        )
        .await
    }

    async fn record_close_fill(
        &self,
        position_id: PositionId,
        fill: &VenueFill,
    ) -> Result<Position, ManagerError> {
        self.close_position(position_id, fill.fill_price.as_decimal()).await
    }
}

// =============================================================================
// Exchange adapter
// =============================================================================

/// Result of an order that filled and was durably recorded.
#[derive(Debug, Clone)]
pub struct OrderResult {
    /// The stored position after recording the fill
    pub position: Position,
    /// The venue's fill report
    pub fill: VenueFill,
}

/// Retry policy for idempotent reads.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    /// Total attempts (first try included)
    pub max_attempts: u32,
    /// Delay before the first retry; doubles per attempt
    pub base_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_attempts: 3, base_delay: Duration::from_millis(250) }
    }
}

/// Rate-limited, retrying façade over a venue.
pub struct ExchangeAdapter<V: VenuePort> {
    venue: Arc<V>,
    limiter: Arc<RateLimiter>,
    sink: Arc<dyn FillSink>,
    retry: RetryConfig,
}

impl<V: VenuePort> ExchangeAdapter<V> {
    /// Create an adapter over the given venue, limiter, and fill sink.
    pub fn new(venue: Arc<V>, limiter: Arc<RateLimiter>, sink: Arc<dyn FillSink>) -> Self {
        Self { venue, limiter, sink, retry: RetryConfig::default() }
    }

    /// Override the read retry policy.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Place an entry order for a worker.
    ///
    /// Submitted to the venue exactly once (never retried: a duplicate
    /// submission could double-fill). On fill, the position is recorded in
    /// the store before success is returned.
    ///
    /// # Errors
    ///
    /// `RateLimitExceeded` without touching the network when the limiter is
    /// saturated; `Unavailable`/`OrderRejected` from the venue; `Recording`
    /// if the fill could not be stored (the order DID reach the venue —
    /// reconciliation will adopt the position).
    pub async fn place_order(
        &self,
        worker_id: WorkerId,
        symbol: Symbol,
        side: Side,
        quantity: Quantity,
        order_type: OrderType,
    ) -> ExchangeResult<OrderResult> {
        self.limiter.try_acquire().await?;

        let fill = self
            .venue
            .place_order(&symbol, side.entry_action(), quantity, &order_type)
            .await?;

        let position = self
            .sink
            .record_open_fill(worker_id, symbol, side, &fill)
            .await?;

        info!(
            position_id = %position.id,
            worker_id = %worker_id,
            venue_order_id = %fill.venue_order_id,
            fill_price = %fill.fill_price,
            "Entry order filled and recorded"
        );

        Ok(OrderResult { position, fill })
    }

    /// Place the exit order for a held position and record the close.
    ///
    /// Same single-submission and write-through rules as [`place_order`].
    ///
    /// [`place_order`]: ExchangeAdapter::place_order
    pub async fn close_position(&self, position: &Position) -> ExchangeResult<OrderResult> {
        self.limiter.try_acquire().await?;

        let fill = self
            .venue
            .place_order(
                &position.symbol,
                position.side.exit_action(),
                position.quantity,
                &OrderType::Market,
            )
            .await?;

        let closed = self.sink.record_close_fill(position.id, &fill).await?;

        info!(
            position_id = %closed.id,
            venue_order_id = %fill.venue_order_id,
            realized_pnl = %closed.realized_pnl,
            "Exit order filled and recorded"
        );

        Ok(OrderResult { position: closed, fill })
    }

    /// Positions the venue currently reports (reconciliation input).
    ///
    /// Idempotent read: retried with backoff on transient failures.
    pub async fn get_open_positions(&self) -> ExchangeResult<Vec<ExchangePosition>> {
        let venue = Arc::clone(&self.venue);
        self.retry_read("get_open_positions", move || {
            let venue = Arc::clone(&venue);
            async move { venue.get_open_positions().await }
        })
        .await
    }

    /// Current price for a symbol. Retried like any idempotent read.
    pub async fn get_ticker(&self, symbol: &Symbol) -> ExchangeResult<Price> {
        let venue = Arc::clone(&self.venue);
        let symbol = symbol.clone();
        self.retry_read("get_ticker", move || {
            let venue = Arc::clone(&venue);
            let symbol = symbol.clone();
            async move { venue.get_ticker(&symbol).await }
        })
        .await
    }

    /// Best-effort cancel: a new request, not a true abort. Submitted once;
    /// the venue may already have filled the order.
    pub async fn cancel_order(&self, symbol: &Symbol, order_id: &str) -> ExchangeResult<()> {
        self.limiter.acquire().await?;
        self.venue.cancel_order(symbol, order_id).await
    }

    /// Run a read operation under the limiter with bounded exponential
    /// backoff. Only `Unavailable` is retried.
    async fn retry_read<T, F, Fut>(&self, op_name: &'static str, op: F) -> ExchangeResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = ExchangeResult<T>>,
    {
        let mut delay = self.retry.base_delay;
        let mut attempt = 1;

        loop {
            self.limiter.acquire().await?;

            match op().await {
                Ok(value) => return Ok(value),
                Err(ExchangeError::Unavailable(reason)) if attempt < self.retry.max_attempts => {
                    warn!(
                        op = op_name,
                        attempt,
                        max_attempts = self.retry.max_attempts,
                        %reason,
                        "Transient venue failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                    attempt += 1;
                }
                Err(other) => return Err(other),
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stub::StubVenue;
    use keeper_domain::PositionStatus;
    use keeper_store::SqliteStore;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    async fn test_setup() -> (Arc<StubVenue>, Arc<PositionManager>, ExchangeAdapter<StubVenue>) {
        test_setup_with_limit(100).await
    }

    async fn test_setup_with_limit(
        max_per_second: usize,
    ) -> (Arc<StubVenue>, Arc<PositionManager>, ExchangeAdapter<StubVenue>) {
        let venue = Arc::new(StubVenue::new(dec!(50000)));
        let store = SqliteStore::open_in_memory().await.unwrap();
        let manager = Arc::new(PositionManager::new(store));
        let limiter = Arc::new(
            RateLimiter::new(max_per_second, Duration::from_secs(1))
                .with_max_wait(Duration::from_millis(50)),
        );
        let adapter = ExchangeAdapter::new(Arc::clone(&venue), limiter, manager.clone() as Arc<dyn FillSink>)
            .with_retry(RetryConfig { max_attempts: 3, base_delay: Duration::from_millis(1) });
        (venue, manager, adapter)
    }

    fn btc() -> Symbol {
        Symbol::from_pair("BTCUSDT").unwrap()
    }

    #[tokio::test]
    async fn test_place_order_records_position_before_returning() {
        let (_venue, manager, adapter) = test_setup().await;
        let worker = Uuid::now_v7();

        let result = adapter
            .place_order(worker, btc(), Side::Long, Quantity::new(dec!(0.5)).unwrap(), OrderType::Market)
            .await
            .unwrap();

        // The store already knows about the position
        let stored = manager.get_position(result.position.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PositionStatus::Open);
        assert_eq!(stored.owner_worker_id, worker);
        assert_eq!(stored.quantity.as_decimal(), dec!(0.5));
        assert_eq!(stored.entry_price.as_decimal(), dec!(50000));
    }

    #[tokio::test]
    async fn test_order_placement_is_never_retried() {
        let (venue, manager, adapter) = test_setup().await;
        venue.fail_next();

        let result = adapter
            .place_order(
                Uuid::now_v7(),
                btc(),
                Side::Long,
                Quantity::new(dec!(1)).unwrap(),
                OrderType::Market,
            )
            .await;

        assert!(matches!(result, Err(ExchangeError::Unavailable(_))));
        // Exactly one network attempt, nothing recorded
        assert_eq!(venue.call_count(), 1);
        assert!(manager.get_open_positions(None, 10, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_order_surfaces_venue_reason() {
        let (venue, _manager, adapter) = test_setup().await;
        venue.reject_next("insufficient balance");

        let result = adapter
            .place_order(
                Uuid::now_v7(),
                btc(),
                Side::Long,
                Quantity::new(dec!(1)).unwrap(),
                OrderType::Market,
            )
            .await;

        match result {
            Err(ExchangeError::OrderRejected(reason)) => {
                assert!(reason.contains("insufficient balance"));
            }
            other => panic!("Expected OrderRejected, got {:?}", other),
        }
        assert_eq!(venue.call_count(), 1);
    }

    #[tokio::test]
    async fn test_reads_retry_transient_failures() {
        let (venue, _manager, adapter) = test_setup().await;
        venue.fail_next();

        let price = adapter.get_ticker(&btc()).await.unwrap();
        assert_eq!(price.as_decimal(), dec!(50000));
        // First attempt failed, second succeeded
        assert_eq!(venue.call_count(), 2);
    }

    #[tokio::test]
    async fn test_read_retries_are_bounded() {
        let (venue, _manager, adapter) = test_setup().await;
        venue.fail_always();

        let result = adapter.get_ticker(&btc()).await;
        assert!(matches!(result, Err(ExchangeError::Unavailable(_))));
        assert_eq!(venue.call_count(), 3);
    }

    #[tokio::test]
    async fn test_close_position_records_realized_pnl() {
        let (venue, manager, adapter) = test_setup().await;

        let opened = adapter
            .place_order(
                Uuid::now_v7(),
                btc(),
                Side::Long,
                Quantity::new(dec!(1)).unwrap(),
                OrderType::Market,
            )
            .await
            .unwrap();

        venue.set_price("BTCUSDT", dec!(51000));
        let closed = adapter.close_position(&opened.position).await.unwrap();

        assert_eq!(closed.position.status, PositionStatus::Closed);
        assert_eq!(closed.position.realized_pnl, dec!(1000));

        let stored = manager.get_position(opened.position.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PositionStatus::Closed);
    }

    #[tokio::test]
    async fn test_close_unknown_position_surfaces_recording_error() {
        let (_venue, _manager, adapter) = test_setup().await;

        let ghost = Position::open(
            Uuid::now_v7(),
            btc(),
            Side::Long,
            Quantity::new(dec!(1)).unwrap(),
            Price::new(dec!(50000)).unwrap(),
        );

        // The order reaches the venue, but recording fails: the caller must
        // see the failure rather than a claimed success.
        let result = adapter.close_position(&ghost).await;
        assert!(matches!(result, Err(ExchangeError::Recording(ManagerError::NotFound(_)))));
    }

    #[tokio::test]
    async fn test_burst_of_orders_hits_rate_limit() {
        let (venue, _manager, adapter) = test_setup_with_limit(10).await;
        let worker = Uuid::now_v7();

        let mut placed = 0;
        let mut limited = 0;
        for _ in 0..100 {
            match adapter
                .place_order(
                    worker,
                    btc(),
                    Side::Long,
                    Quantity::new(dec!(0.01)).unwrap(),
                    OrderType::Market,
                )
                .await
            {
                Ok(_) => placed += 1,
                Err(ExchangeError::RateLimitExceeded) => limited += 1,
                Err(other) => panic!("unexpected error: {}", other),
            }
        }

        // At most the window's worth reached the network
        assert_eq!(placed, 10);
        assert_eq!(limited, 90);
        assert_eq!(venue.call_count(), 10);
    }
}
