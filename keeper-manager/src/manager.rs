//! Position State Manager: the single writer of position state.
//!
//! The manager owns the durable store and exposes atomic operations to
//! open, adjust, and close positions. Every mutation writes the position
//! row and its event in one transaction; workers and the exchange adapter
//! submit intents and observations, never row mutations.
//!
//! # Architecture
//!
//! ```text
//! Worker → Base → Exchange Adapter (fill) → PositionManager → SqliteStore
//!                                                 ↑
//!                         reconcile_with_exchange (startup + interval)
//! ```

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{debug, info};

use keeper_domain::{
    EventPayload, Position, PositionEvent, PositionId, PositionStatus, Price, Quantity, Side,
    Symbol, WorkerId,
};
use keeper_store::{self as store, SqliteStore};

use crate::error::{ManagerError, ManagerResult};
use crate::reconcile::ReconcileConfig;

// =============================================================================
// Position Manager
// =============================================================================

/// Owns the durable store and serializes all position mutations.
pub struct PositionManager {
    store: SqliteStore,
    pub(crate) reconcile_config: ReconcileConfig,
    /// Consecutive reconciliation runs each held position has been missing
    /// from the exchange snapshot. In-memory by design: a restart resets the
    /// confidence window and never closes a phantom early.
    pub(crate) miss_streaks: Mutex<HashMap<PositionId, u32>>,
}

impl PositionManager {
    /// Create a manager with default reconciliation settings.
    pub fn new(store: SqliteStore) -> Self {
        Self::with_config(store, ReconcileConfig::default())
    }

    /// Create a manager with explicit reconciliation settings.
    pub fn with_config(store: SqliteStore, reconcile_config: ReconcileConfig) -> Self {
        Self {
            store,
            reconcile_config,
            miss_streaks: Mutex::new(HashMap::new()),
        }
    }

    /// The underlying store (read access for collaborators and tests).
    pub fn store(&self) -> &SqliteStore {
        &self.store
    }

    // =========================================================================
    // Lifecycle operations
    // =========================================================================

    /// Open a position from a confirmed fill.
    ///
    /// Inserts the row and its OPENED event atomically.
    ///
    /// # Errors
    ///
    /// `Validation` for non-positive quantity or price; `Storage` if the
    /// transaction cannot commit (safe to retry).
    pub async fn open_position(
        &self,
        worker_id: WorkerId,
        symbol: Symbol,
        side: Side,
        quantity: Decimal,
        entry_price: Decimal,
    ) -> ManagerResult<Position> {
        let quantity = Quantity::new(quantity)?;
        let entry_price = Price::new(entry_price)?;

        let position = Position::open(worker_id, symbol, side, quantity, entry_price);

        let mut tx = self.store.begin().await?;
        store::insert_position(&mut tx, &position).await?;
        store::append_event(&mut tx, &EventPayload::Opened { snapshot: position.clone() }).await?;
        tx.commit()
            .await
            .map_err(|e| ManagerError::Storage(keeper_store::StoreError::Transaction(e.to_string())))?;

        info!(
            position_id = %position.id,
            worker_id = %worker_id,
            symbol = %position.symbol,
            side = %side,
            quantity = %position.quantity,
            entry_price = %position.entry_price,
            "Position opened"
        );

        Ok(position)
    }

    /// Update mark price and optionally adjust quantity.
    ///
    /// Recomputes unrealized P&L and appends an ADJUSTED event with the
    /// delta and resulting state.
    ///
    /// # Errors
    ///
    /// `NotFound` if the position is unknown or already closed;
    /// `Validation` if the delta would take quantity to zero or below.
    pub async fn update_position(
        &self,
        position_id: PositionId,
        current_price: Decimal,
        quantity_delta: Decimal,
    ) -> ManagerResult<Position> {
        let current_price = Price::new(current_price)?;
        let mut position = self.load_held(position_id).await?;

        if quantity_delta != Decimal::ZERO {
            position.quantity = position.quantity.apply_delta(quantity_delta)?;
        }
        position.current_price = current_price;
        position.unrealized_pnl = position.unrealized_at(current_price);
        touch(&mut position);

        let mut tx = self.store.begin().await?;
        store::update_position(&mut tx, &position).await?;
        store::append_event(
            &mut tx,
            &EventPayload::Adjusted { quantity_delta, snapshot: position.clone() },
        )
        .await?;
        tx.commit()
            .await
            .map_err(|e| ManagerError::Storage(keeper_store::StoreError::Transaction(e.to_string())))?;

        debug!(
            position_id = %position.id,
            current_price = %current_price,
            quantity_delta = %quantity_delta,
            unrealized_pnl = %position.unrealized_pnl,
            "Position adjusted"
        );

        Ok(position)
    }

    /// Mark a position as closing (exit order submitted, fill pending).
    ///
    /// Idempotent for positions already in `Closing`.
    pub async fn mark_closing(&self, position_id: PositionId) -> ManagerResult<Position> {
        let mut position = self.load_held(position_id).await?;

        if position.status == PositionStatus::Closing {
            return Ok(position);
        }

        position.status = PositionStatus::Closing;
        touch(&mut position);

        let mut tx = self.store.begin().await?;
        store::update_position(&mut tx, &position).await?;
        store::append_event(
            &mut tx,
            &EventPayload::Adjusted { quantity_delta: Decimal::ZERO, snapshot: position.clone() },
        )
        .await?;
        tx.commit()
            .await
            .map_err(|e| ManagerError::Storage(keeper_store::StoreError::Transaction(e.to_string())))?;

        debug!(position_id = %position.id, "Position marked closing");

        Ok(position)
    }

    /// Close a position at the given exit price.
    ///
    /// Computes `realized_pnl = (exit - entry) * quantity * direction_sign`
    /// and appends a CLOSED event. Idempotent: closing an already-closed
    /// position returns the stored record and appends nothing, so a
    /// duplicate-close race cannot corrupt state.
    ///
    /// # Errors
    ///
    /// `NotFound` if the position is unknown.
    pub async fn close_position(
        &self,
        position_id: PositionId,
        exit_price: Decimal,
    ) -> ManagerResult<Position> {
        let exit_price = Price::new(exit_price)?;

        let mut position = self
            .store
            .get_position(position_id)
            .await?
            .ok_or(ManagerError::NotFound(position_id))?;

        if position.is_closed() {
            debug!(position_id = %position.id, "Close is a no-op: already closed");
            return Ok(position);
        }

        let realized_pnl = position.realized_at(exit_price);
        position.status = PositionStatus::Closed;
        position.current_price = exit_price;
        position.realized_pnl = realized_pnl;
        position.unrealized_pnl = Decimal::ZERO;
        position.closed_at = Some(Utc::now());
        touch(&mut position);

        let mut tx = self.store.begin().await?;
        store::update_position(&mut tx, &position).await?;
        store::append_event(
            &mut tx,
            &EventPayload::Closed {
                exit_price: exit_price.as_decimal(),
                realized_pnl,
                snapshot: position.clone(),
            },
        )
        .await?;
        tx.commit()
            .await
            .map_err(|e| ManagerError::Storage(keeper_store::StoreError::Transaction(e.to_string())))?;

        info!(
            position_id = %position.id,
            exit_price = %exit_price,
            realized_pnl = %realized_pnl,
            "Position closed"
        );

        Ok(position)
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Paginated open (and closing) positions, optionally filtered by worker.
    pub async fn get_open_positions(
        &self,
        worker_id: Option<WorkerId>,
        limit: i64,
        offset: i64,
    ) -> ManagerResult<Vec<Position>> {
        if limit <= 0 {
            return Err(ManagerError::Validation("limit must be positive".to_string()));
        }
        if offset < 0 {
            return Err(ManagerError::Validation("offset must be non-negative".to_string()));
        }

        Ok(self.store.open_positions(worker_id, limit, offset).await?)
    }

    /// Fetch a single position by ID.
    pub async fn get_position(&self, position_id: PositionId) -> ManagerResult<Option<Position>> {
        Ok(self.store.get_position(position_id).await?)
    }

    /// A position's ordered event history.
    pub async fn get_events(&self, position_id: PositionId) -> ManagerResult<Vec<PositionEvent>> {
        Ok(self.store.events_for_position(position_id).await?)
    }

    /// Reconstruct a position purely from its event stream.
    pub async fn replay_position(
        &self,
        position_id: PositionId,
    ) -> ManagerResult<Option<Position>> {
        let events = self.store.events_for_position(position_id).await?;
        Ok(keeper_domain::replay(&events))
    }

    // =========================================================================
    // Internal helpers
    // =========================================================================

    /// Load a position that must still be held (open or closing).
    async fn load_held(&self, position_id: PositionId) -> ManagerResult<Position> {
        let position = self
            .store
            .get_position(position_id)
            .await?
            .ok_or(ManagerError::NotFound(position_id))?;

        if position.is_closed() {
            return Err(ManagerError::NotFound(position_id));
        }

        Ok(position)
    }
}

/// Re-stamp `updated_at`, keeping it monotonically non-decreasing even if
/// the wall clock stepped backwards.
pub(crate) fn touch(position: &mut Position) {
    position.updated_at = position.updated_at.max(Utc::now());
}

// =============================================================================
// Tests
// =============================================================================
