//! Exchange reconciliation: the self-healing core.
//!
//! The exchange is the ultimate source of truth for what is actually held.
//! Reconciliation compares every locally held position against the
//! exchange's reported set (matched by symbol + side) and repairs drift in
//! the exchange's favor, recording every correction as an immutable event:
//!
//! 1. Local position missing from the exchange → closed as a phantom
//!    (after the confidence window, see [`ReconcileConfig`])
//! 2. Exchange position missing locally → adopted as a new local position
//! 3. Divergent quantity/entry price → local repaired, ANOMALY_DETECTED
//!    event with the drift magnitude
//!
//! Each repair is its own transaction, so the pass is safely interruptible
//! and re-runnable; with no drift it is a no-op.

use std::collections::HashMap;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use keeper_domain::{
    EventPayload, ExchangePosition, Position, PositionId, PositionStatus, ReconcileReason,
    ReconciliationRecord, ReconciliationStatus, Side, WorkerId,
};
use keeper_store as store;

use crate::error::{ManagerError, ManagerResult};
use crate::manager::{touch, PositionManager};

/// Owner recorded on positions adopted from the exchange. No worker claims
/// them until an operator reassigns or closes them.
pub fn system_worker_id() -> WorkerId {
    Uuid::nil()
}

/// Reconciliation tuning.
#[derive(Debug, Clone, Copy)]
pub struct ReconcileConfig {
    /// Consecutive runs a position must be missing from the exchange
    /// snapshot before it is closed as a phantom. The default of 2 protects
    /// against a single stale exchange read overwriting correct local
    /// state; 1 restores single-read behavior.
    pub phantom_confirmations: u32,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self { phantom_confirmations: 2 }
    }
}

impl PositionManager {
    /// Reconcile local state against the exchange's reported positions.
    ///
    /// Runs at startup (before any trading) and on an interval thereafter.
    /// Returns the persisted summary record.
    pub async fn reconcile_with_exchange(
        &self,
        exchange_positions: &[ExchangePosition],
    ) -> ManagerResult<ReconciliationRecord> {
        let run_id = Uuid::now_v7();
        let started_at = Utc::now();

        let local = self.store().held_positions().await?;
        let local_count = local.len() as u32;
        let exchange_count = exchange_positions.len() as u32;

        // Index the exchange snapshot by symbol+side; entries are consumed
        // as local positions match, leaving the set to adopt.
        let mut remaining: HashMap<(String, Side), ExchangePosition> = exchange_positions
            .iter()
            .map(|ex| ((ex.symbol.as_pair(), ex.side), ex.clone()))
            .collect();

        let mut found = 0u32;
        let mut resolved = 0u32;

        for position in local {
            let key = (position.symbol.as_pair(), position.side);
            match remaining.remove(&key) {
                Some(exchange) => {
                    self.clear_miss(position.id);
                    if self.repair_drift(position, &exchange).await? {
                        found += 1;
                        resolved += 1;
                    }
                }
                None => {
                    found += 1;
                    if self.handle_missing(position).await? {
                        resolved += 1;
                    }
                }
            }
        }

        // Whatever the exchange reports that we have no row for, we adopt:
        // this is how a crashed-and-restarted process recovers positions it
        // forgot about.
        for (_, exchange) in remaining {
            found += 1;
            self.adopt(exchange).await?;
            resolved += 1;
        }

        let record = ReconciliationRecord {
            run_id,
            started_at,
            completed_at: Utc::now(),
            local_position_count: local_count,
            exchange_position_count: exchange_count,
            discrepancies_found: found,
            discrepancies_resolved: resolved,
            status: if found == 0 {
                ReconciliationStatus::Clean
            } else {
                ReconciliationStatus::Repaired
            },
        };

        let mut tx = self.store().begin().await?;
        store::insert_reconciliation(&mut tx, &record).await?;
        tx.commit()
            .await
            .map_err(|e| ManagerError::Storage(store::StoreError::Transaction(e.to_string())))?;

        info!(
            run_id = %run_id,
            local_positions = local_count,
            exchange_positions = exchange_count,
            discrepancies_found = found,
            discrepancies_resolved = resolved,
            status = record.status.as_str(),
            "Reconciliation complete"
        );

        Ok(record)
    }

    /// Repair quantity/entry-price drift on a matched position.
    ///
    /// Returns true if the position had drifted.
    async fn repair_drift(
        &self,
        mut position: Position,
        exchange: &ExchangePosition,
    ) -> ManagerResult<bool> {
        let qty_drift = (position.quantity.as_decimal() - exchange.quantity.as_decimal()).abs();
        let price_drift =
            (position.entry_price.as_decimal() - exchange.entry_price.as_decimal()).abs();

        if qty_drift.is_zero() && price_drift.is_zero() {
            return Ok(false);
        }

        let local_quantity = position.quantity.as_decimal();
        let local_entry = position.entry_price.as_decimal();

        position.quantity = exchange.quantity;
        position.entry_price = exchange.entry_price;
        position.unrealized_pnl = position.unrealized_at(position.current_price);
        touch(&mut position);

        let mut tx = self.store().begin().await?;
        store::update_position(&mut tx, &position).await?;
        if !qty_drift.is_zero() {
            store::append_event(
                &mut tx,
                &EventPayload::AnomalyDetected {
                    field: "quantity".to_string(),
                    local_value: local_quantity,
                    exchange_value: exchange.quantity.as_decimal(),
                    drift: qty_drift,
                    snapshot: position.clone(),
                },
            )
            .await?;
        }
        if !price_drift.is_zero() {
            store::append_event(
                &mut tx,
                &EventPayload::AnomalyDetected {
                    field: "entry_price".to_string(),
                    local_value: local_entry,
                    exchange_value: exchange.entry_price.as_decimal(),
                    drift: price_drift,
                    snapshot: position.clone(),
                },
            )
            .await?;
        }
        tx.commit()
            .await
            .map_err(|e| ManagerError::Storage(store::StoreError::Transaction(e.to_string())))?;

        warn!(
            position_id = %position.id,
            symbol = %position.symbol,
            quantity_drift = %qty_drift,
            entry_price_drift = %price_drift,
            "Drift repaired in favor of exchange"
        );

        Ok(true)
    }

    /// Handle a held position absent from the exchange snapshot.
    ///
    /// Closes it as a phantom once the miss streak reaches the confidence
    /// window; returns true if the position was closed this run.
    async fn handle_missing(&self, mut position: Position) -> ManagerResult<bool> {
        let streak = self.bump_miss(position.id);

        if streak < self.reconcile_config.phantom_confirmations {
            debug!(
                position_id = %position.id,
                symbol = %position.symbol,
                streak,
                required = self.reconcile_config.phantom_confirmations,
                "Position missing from exchange snapshot, awaiting confirmation"
            );
            return Ok(false);
        }

        position.status = PositionStatus::Closed;
        position.unrealized_pnl = rust_decimal::Decimal::ZERO;
        position.closed_at = Some(Utc::now());
        touch(&mut position);

        let mut tx = self.store().begin().await?;
        store::update_position(&mut tx, &position).await?;
        store::append_event(
            &mut tx,
            &EventPayload::Reconciled {
                reason: ReconcileReason::PhantomRemoved,
                snapshot: position.clone(),
            },
        )
        .await?;
        tx.commit()
            .await
            .map_err(|e| ManagerError::Storage(store::StoreError::Transaction(e.to_string())))?;

        self.clear_miss(position.id);

        warn!(
            position_id = %position.id,
            symbol = %position.symbol,
            "Phantom position removed"
        );

        Ok(true)
    }

    /// Create a local position from an exchange-only report.
    async fn adopt(&self, exchange: ExchangePosition) -> ManagerResult<()> {
        let position = Position::open(
            system_worker_id(),
            exchange.symbol,
            exchange.side,
            exchange.quantity,
            exchange.entry_price,
        );

        let mut tx = self.store().begin().await?;
        store::insert_position(&mut tx, &position).await?;
        store::append_event(
            &mut tx,
            &EventPayload::Reconciled {
                reason: ReconcileReason::AdoptedFromExchange,
                snapshot: position.clone(),
            },
        )
        .await?;
        tx.commit()
            .await
            .map_err(|e| ManagerError::Storage(store::StoreError::Transaction(e.to_string())))?;

        info!(
            position_id = %position.id,
            symbol = %position.symbol,
            side = %position.side,
            quantity = %position.quantity,
            "Adopted position from exchange"
        );

        Ok(())
    }

    fn bump_miss(&self, position_id: PositionId) -> u32 {
        let mut streaks = self.miss_streaks.lock().unwrap();
        let streak = streaks.entry(position_id).or_insert(0);
        *streak += 1;
        *streak
    }

    fn clear_miss(&self, position_id: PositionId) {
        self.miss_streaks.lock().unwrap().remove(&position_id);
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use keeper_domain::{EventKind, Price, Quantity, Symbol};
    use keeper_store::SqliteStore;
    use rust_decimal_macros::dec;

    async fn manager_with_confirmations(confirmations: u32) -> PositionManager {
        let store = SqliteStore::open_in_memory().await.unwrap();
        PositionManager::with_config(store, ReconcileConfig { phantom_confirmations: confirmations })
    }

    fn btc() -> Symbol {
        Symbol::from_pair("BTCUSDT").unwrap()
    }

    fn exchange_position(pair: &str, side: Side, quantity: rust_decimal::Decimal, entry: rust_decimal::Decimal) -> ExchangePosition {
        ExchangePosition {
            symbol: Symbol::from_pair(pair).unwrap(),
            side,
            quantity: Quantity::new(quantity).unwrap(),
            entry_price: Price::new(entry).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_reconcile_clean_state_is_noop() {
        let manager = manager_with_confirmations(1).await;
        manager
            .open_position(Uuid::now_v7(), btc(), Side::Long, dec!(1), dec!(50000))
            .await
            .unwrap();

        let exchange = vec![exchange_position("BTCUSDT", Side::Long, dec!(1), dec!(50000))];

        let record = manager.reconcile_with_exchange(&exchange).await.unwrap();
        assert_eq!(record.discrepancies_found, 0);
        assert_eq!(record.status, ReconciliationStatus::Clean);

        // Second run is also clean (idempotent)
        let second = manager.reconcile_with_exchange(&exchange).await.unwrap();
        assert_eq!(second.discrepancies_found, 0);
        assert_eq!(second.status, ReconciliationStatus::Clean);
    }

    #[tokio::test]
    async fn test_phantom_closed_immediately_with_single_confirmation() {
        let manager = manager_with_confirmations(1).await;
        let position = manager
            .open_position(Uuid::now_v7(), btc(), Side::Long, dec!(1), dec!(50000))
            .await
            .unwrap();

        let record = manager.reconcile_with_exchange(&[]).await.unwrap();
        assert_eq!(record.discrepancies_found, 1);
        assert_eq!(record.discrepancies_resolved, 1);

        let closed = manager.get_position(position.id).await.unwrap().unwrap();
        assert_eq!(closed.status, PositionStatus::Closed);

        let events = manager.get_events(position.id).await.unwrap();
        let reconciled = events
            .iter()
            .find(|e| e.payload.kind() == EventKind::Reconciled)
            .expect("RECONCILED event");
        match &reconciled.payload {
            EventPayload::Reconciled { reason, .. } => {
                assert_eq!(*reason, ReconcileReason::PhantomRemoved);
                assert_eq!(reason.as_str(), "phantom position removed");
            }
            other => panic!("Expected Reconciled, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_phantom_waits_for_confidence_window() {
        let manager = manager_with_confirmations(2).await;
        let position = manager
            .open_position(Uuid::now_v7(), btc(), Side::Long, dec!(1), dec!(50000))
            .await
            .unwrap();

        // First miss: observed but not yet closed
        let first = manager.reconcile_with_exchange(&[]).await.unwrap();
        assert_eq!(first.discrepancies_found, 1);
        assert_eq!(first.discrepancies_resolved, 0);
        let still_open = manager.get_position(position.id).await.unwrap().unwrap();
        assert_eq!(still_open.status, PositionStatus::Open);

        // Second consecutive miss: closed
        let second = manager.reconcile_with_exchange(&[]).await.unwrap();
        assert_eq!(second.discrepancies_resolved, 1);
        let closed = manager.get_position(position.id).await.unwrap().unwrap();
        assert_eq!(closed.status, PositionStatus::Closed);
    }

    #[tokio::test]
    async fn test_reappearing_position_resets_confidence_window() {
        let manager = manager_with_confirmations(2).await;
        let position = manager
            .open_position(Uuid::now_v7(), btc(), Side::Long, dec!(1), dec!(50000))
            .await
            .unwrap();

        // Miss once, then the exchange shows it again (stale read recovered)
        manager.reconcile_with_exchange(&[]).await.unwrap();
        let exchange = vec![exchange_position("BTCUSDT", Side::Long, dec!(1), dec!(50000))];
        manager.reconcile_with_exchange(&exchange).await.unwrap();

        // A fresh miss starts the streak over; position survives
        manager.reconcile_with_exchange(&[]).await.unwrap();
        let still_open = manager.get_position(position.id).await.unwrap().unwrap();
        assert_eq!(still_open.status, PositionStatus::Open);
    }

    #[tokio::test]
    async fn test_adoption_creates_local_position() {
        let manager = manager_with_confirmations(1).await;

        let exchange = vec![exchange_position("ETHUSDT", Side::Short, dec!(2), dec!(3000))];
        let record = manager.reconcile_with_exchange(&exchange).await.unwrap();
        assert_eq!(record.discrepancies_found, 1);
        assert_eq!(record.discrepancies_resolved, 1);

        let open = manager.get_open_positions(None, 10, 0).await.unwrap();
        assert_eq!(open.len(), 1);
        let adopted = &open[0];
        assert_eq!(adopted.owner_worker_id, system_worker_id());
        assert_eq!(adopted.symbol.as_pair(), "ETHUSDT");
        assert_eq!(adopted.quantity.as_decimal(), dec!(2));

        let events = manager.get_events(adopted.id).await.unwrap();
        assert_eq!(events.len(), 1);
        match &events[0].payload {
            EventPayload::Reconciled { reason, .. } => {
                assert_eq!(*reason, ReconcileReason::AdoptedFromExchange);
            }
            other => panic!("Expected Reconciled, got {:?}", other),
        }

        // Re-running with the same snapshot does not adopt a duplicate
        let second = manager.reconcile_with_exchange(&exchange).await.unwrap();
        assert_eq!(second.discrepancies_found, 0);
        assert_eq!(manager.get_open_positions(None, 10, 0).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_drift_correction_favors_exchange() {
        let manager = manager_with_confirmations(1).await;
        let position = manager
            .open_position(Uuid::now_v7(), btc(), Side::Long, dec!(2), dec!(50000))
            .await
            .unwrap();

        let exchange = vec![exchange_position("BTCUSDT", Side::Long, dec!(1.5), dec!(50000))];
        let record = manager.reconcile_with_exchange(&exchange).await.unwrap();
        assert_eq!(record.discrepancies_found, 1);
        assert_eq!(record.discrepancies_resolved, 1);

        let repaired = manager.get_position(position.id).await.unwrap().unwrap();
        assert_eq!(repaired.quantity.as_decimal(), dec!(1.5));
        assert_eq!(repaired.status, PositionStatus::Open);

        let events = manager.get_events(position.id).await.unwrap();
        let anomaly = events
            .iter()
            .find(|e| e.payload.kind() == EventKind::AnomalyDetected)
            .expect("ANOMALY_DETECTED event");
        match &anomaly.payload {
            EventPayload::AnomalyDetected { field, local_value, exchange_value, drift, .. } => {
                assert_eq!(field, "quantity");
                assert_eq!(*local_value, dec!(2));
                assert_eq!(*exchange_value, dec!(1.5));
                assert_eq!(*drift, dec!(0.5));
            }
            other => panic!("Expected AnomalyDetected, got {:?}", other),
        }

        // No drift on the second run
        let second = manager.reconcile_with_exchange(&exchange).await.unwrap();
        assert_eq!(second.discrepancies_found, 0);
    }

    #[tokio::test]
    async fn test_closing_position_matches_exchange_row() {
        let manager = manager_with_confirmations(1).await;
        let position = manager
            .open_position(Uuid::now_v7(), btc(), Side::Long, dec!(1), dec!(50000))
            .await
            .unwrap();
        manager.mark_closing(position.id).await.unwrap();

        // Exchange still shows the position; it must match the CLOSING row
        // rather than being adopted as a second local position.
        let exchange = vec![exchange_position("BTCUSDT", Side::Long, dec!(1), dec!(50000))];
        let record = manager.reconcile_with_exchange(&exchange).await.unwrap();
        assert_eq!(record.discrepancies_found, 0);
        assert_eq!(manager.get_open_positions(None, 10, 0).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_reconciliation_record_persisted() {
        let manager = manager_with_confirmations(1).await;
        manager
            .open_position(Uuid::now_v7(), btc(), Side::Long, dec!(1), dec!(50000))
            .await
            .unwrap();

        manager.reconcile_with_exchange(&[]).await.unwrap();

        let latest = manager.store().latest_reconciliation().await.unwrap().unwrap();
        assert_eq!(latest.local_position_count, 1);
        assert_eq!(latest.exchange_position_count, 0);
        assert_eq!(latest.status, ReconciliationStatus::Repaired);
    }
}
