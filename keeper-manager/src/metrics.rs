//! Performance metrics derived from stored state.
//!
//! Read-only aggregates consumed by monitoring collaborators.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::Serialize;

use keeper_domain::WorkerId;

use crate::error::ManagerResult;
use crate::manager::PositionManager;

/// Aggregated trading performance across all workers.
#[derive(Debug, Clone, Serialize)]
pub struct PerformanceMetrics {
    pub open_positions: i64,
    pub closing_positions: i64,
    pub closed_positions: i64,
    pub total_realized_pnl: Decimal,
    pub winning_positions: i64,
    /// Fraction of closed positions with positive realized P&L;
    /// `None` until something has closed.
    pub win_rate: Option<Decimal>,
    pub event_count: i64,
    pub per_worker: Vec<WorkerPerformance>,
}

/// Per-worker breakdown of closed-position performance.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerPerformance {
    pub worker_id: WorkerId,
    pub closed_positions: i64,
    pub winning_positions: i64,
    pub realized_pnl: Decimal,
}

impl PositionManager {
    /// Aggregate realized P&L, win rate, and position counts.
    pub async fn get_performance_metrics(&self) -> ManagerResult<PerformanceMetrics> {
        let counts = self.store().status_counts().await?;
        let pnl_rows = self.store().closed_pnl_rows().await?;
        let event_count = self.store().event_count().await?;

        let mut total_realized_pnl = Decimal::ZERO;
        let mut winning_positions = 0i64;
        let mut per_worker: BTreeMap<WorkerId, WorkerPerformance> = BTreeMap::new();

        for (worker_id, pnl) in pnl_rows {
            total_realized_pnl += pnl;
            let is_win = pnl > Decimal::ZERO;
            if is_win {
                winning_positions += 1;
            }

            let entry = per_worker.entry(worker_id).or_insert_with(|| WorkerPerformance {
                worker_id,
                closed_positions: 0,
                winning_positions: 0,
                realized_pnl: Decimal::ZERO,
            });
            entry.closed_positions += 1;
            entry.realized_pnl += pnl;
            if is_win {
                entry.winning_positions += 1;
            }
        }

        let closed_positions = *counts.get("closed").unwrap_or(&0);
        let win_rate = if closed_positions > 0 {
            Some(Decimal::from(winning_positions) / Decimal::from(closed_positions))
        } else {
            None
        };

        Ok(PerformanceMetrics {
            open_positions: *counts.get("open").unwrap_or(&0),
            closing_positions: *counts.get("closing").unwrap_or(&0),
            closed_positions,
            total_realized_pnl,
            winning_positions,
            win_rate,
            event_count,
            per_worker: per_worker.into_values().collect(),
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use keeper_domain::{Side, Symbol};
    use keeper_store::SqliteStore;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    async fn test_manager() -> PositionManager {
        let store = SqliteStore::open_in_memory().await.unwrap();
        PositionManager::new(store)
    }

    fn btc() -> Symbol {
        Symbol::from_pair("BTCUSDT").unwrap()
    }

    #[tokio::test]
    async fn test_empty_store_metrics() {
        let manager = test_manager().await;
        let metrics = manager.get_performance_metrics().await.unwrap();

        assert_eq!(metrics.open_positions, 0);
        assert_eq!(metrics.closed_positions, 0);
        assert_eq!(metrics.total_realized_pnl, Decimal::ZERO);
        assert!(metrics.win_rate.is_none());
        assert!(metrics.per_worker.is_empty());
    }

    #[tokio::test]
    async fn test_metrics_aggregate_closed_positions() {
        let manager = test_manager().await;
        let worker_a = Uuid::now_v7();
        let worker_b = Uuid::now_v7();

        // worker_a: one win (+1000), one loss (-500)
        let win = manager.open_position(worker_a, btc(), Side::Long, dec!(1), dec!(50000)).await.unwrap();
        manager.close_position(win.id, dec!(51000)).await.unwrap();
        let loss = manager.open_position(worker_a, btc(), Side::Long, dec!(1), dec!(50000)).await.unwrap();
        manager.close_position(loss.id, dec!(49500)).await.unwrap();

        // worker_b: one win (+400), one still open
        let short = manager.open_position(worker_b, btc(), Side::Short, dec!(2), dec!(50000)).await.unwrap();
        manager.close_position(short.id, dec!(49800)).await.unwrap();
        manager.open_position(worker_b, btc(), Side::Long, dec!(1), dec!(50000)).await.unwrap();

        let metrics = manager.get_performance_metrics().await.unwrap();

        assert_eq!(metrics.open_positions, 1);
        assert_eq!(metrics.closed_positions, 3);
        assert_eq!(metrics.total_realized_pnl, dec!(900));
        assert_eq!(metrics.winning_positions, 2);
        assert_eq!(metrics.win_rate, Some(dec!(2) / dec!(3)));

        assert_eq!(metrics.per_worker.len(), 2);
        let a = metrics.per_worker.iter().find(|w| w.worker_id == worker_a).unwrap();
        assert_eq!(a.closed_positions, 2);
        assert_eq!(a.winning_positions, 1);
        assert_eq!(a.realized_pnl, dec!(500));
    }
}
