//! Worker capability object.
//!
//! Instead of trusting strategy code to extend a base class correctly, the
//! process constructs one adapter + state manager pair and hands each
//! worker this narrow handle at spawn time. The fields are private: a
//! worker can place and close orders through the safe path, and nothing
//! else. The raw venue client is never reachable from strategy code.
//!
//! The daemon runs a reconciliation pass before any context is handed out,
//! so a freshly started worker never acts on stale local state.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::info;
use uuid::Uuid;

use keeper_domain::{Position, PositionId, Side, Symbol, WorkerId};
use keeper_exchange::{ExchangeAdapter, OrderType, VenuePort};
use keeper_manager::{PerformanceMetrics, PositionManager};

use crate::error::{WorkerError, WorkerResult};

/// The only interface strategy code gets to trading and position state.
pub struct WorkerContext<V: VenuePort> {
    worker_id: WorkerId,
    name: String,
    adapter: Arc<ExchangeAdapter<V>>,
    manager: Arc<PositionManager>,
}

impl<V: VenuePort> WorkerContext<V> {
    /// Construct a context for one worker. Called by the daemon at spawn
    /// time; strategy code never constructs its own.
    pub fn new(
        name: impl Into<String>,
        adapter: Arc<ExchangeAdapter<V>>,
        manager: Arc<PositionManager>,
    ) -> Self {
        let name = name.into();
        let worker_id = Uuid::now_v7();

        info!(%worker_id, worker = %name, "Worker context created");

        Self { worker_id, name, adapter, manager }
    }

    /// This worker's identity (recorded as position owner).
    pub fn worker_id(&self) -> WorkerId {
        self.worker_id
    }

    /// This worker's display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Place an entry order. On success the returned position is already
    /// durably recorded.
    pub async fn place_order(
        &self,
        symbol: Symbol,
        side: Side,
        quantity: Decimal,
        order_type: OrderType,
    ) -> WorkerResult<Position> {
        let quantity = keeper_domain::Quantity::new(quantity)
            .map_err(|e| WorkerError::Manager(keeper_manager::ManagerError::Validation(e.to_string())))?;

        let result = self
            .adapter
            .place_order(self.worker_id, symbol, side, quantity, order_type)
            .await?;

        Ok(result.position)
    }

    /// Close one of this worker's positions at market.
    ///
    /// The position is marked CLOSING before the exit order goes out; if
    /// the venue call fails, reconciliation resolves the in-flight state.
    /// Closing an already-closed position is a no-op.
    pub async fn close_position(&self, position_id: PositionId) -> WorkerResult<Position> {
        let position = self
            .manager
            .get_position(position_id)
            .await?
            .ok_or(WorkerError::Manager(keeper_manager::ManagerError::NotFound(position_id)))?;

        if position.owner_worker_id != self.worker_id {
            return Err(WorkerError::NotOwner(position_id));
        }

        if position.is_closed() {
            return Ok(position);
        }

        let closing = self.manager.mark_closing(position_id).await?;
        let result = self.adapter.close_position(&closing).await?;

        Ok(result.position)
    }

    /// This worker's held positions, paginated.
    pub async fn get_my_positions(&self, limit: i64, offset: i64) -> WorkerResult<Vec<Position>> {
        Ok(self
            .manager
            .get_open_positions(Some(self.worker_id), limit, offset)
            .await?)
    }

    /// Current price via the rate-limited, retrying adapter.
    pub async fn get_ticker(&self, symbol: &Symbol) -> WorkerResult<keeper_domain::Price> {
        Ok(self.adapter.get_ticker(symbol).await?)
    }

    /// Fleet-wide performance aggregates (read-only).
    pub async fn get_performance_metrics(&self) -> WorkerResult<PerformanceMetrics> {
        Ok(self.manager.get_performance_metrics().await?)
    }
}
