//! Integration tests for crash recovery and concurrent ID generation.
//!
//! These tests run against an on-disk database (WAL mode) so that dropping
//! every handle and reopening the file faithfully simulates a process crash
//! and restart.

use std::collections::HashSet;
use std::sync::Arc;

use rust_decimal_macros::dec;
use uuid::Uuid;

use keeper_domain::{
    EventKind, ExchangePosition, PositionStatus, Price, Quantity, Side, Symbol,
};
use keeper_manager::{PositionManager, ReconcileConfig};
use keeper_store::SqliteStore;

fn btc() -> Symbol {
    Symbol::from_pair("BTCUSDT").unwrap()
}

fn exchange_btc_long(quantity: rust_decimal::Decimal) -> ExchangePosition {
    ExchangePosition {
        symbol: btc(),
        side: Side::Long,
        quantity: Quantity::new(quantity).unwrap(),
        entry_price: Price::new(dec!(50000)).unwrap(),
    }
}

/// Open a position, "crash" (drop every handle), restart, reconcile with the
/// exchange still reporting the position: it must survive once, unduplicated.
#[tokio::test]
async fn crash_recovery_preserves_open_position() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("keeper.db");
    let worker = Uuid::now_v7();

    let position_id = {
        let store = SqliteStore::open(&db_path, 4).await.unwrap();
        let manager = PositionManager::new(store);

        let position = manager
            .open_position(worker, btc(), Side::Long, dec!(1), dec!(50000))
            .await
            .unwrap();

        manager.store().close().await;
        position.id
        // Everything dropped here: the "crash"
    };

    // Restart: fresh store and manager over the same file
    let store = SqliteStore::open(&db_path, 4).await.unwrap();
    let manager = PositionManager::new(store);

    let exchange = vec![exchange_btc_long(dec!(1))];
    let record = manager.reconcile_with_exchange(&exchange).await.unwrap();
    assert_eq!(record.discrepancies_found, 0);

    // P1 present, still open, no duplicate created
    let open = manager.get_open_positions(None, 10, 0).await.unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].id, position_id);
    assert_eq!(open[0].status, PositionStatus::Open);

    // The event history survived the restart intact
    let events = manager.get_events(position_id).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].payload.kind(), EventKind::Opened);

    let replayed = manager.replay_position(position_id).await.unwrap().unwrap();
    assert_eq!(replayed.id, position_id);
}

/// A close recorded before the crash must not resurrect after restart, and
/// reconciliation against an exchange that no longer shows the position must
/// change nothing.
#[tokio::test]
async fn crash_recovery_keeps_closed_position_closed() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("keeper.db");

    let position_id = {
        let store = SqliteStore::open(&db_path, 4).await.unwrap();
        let manager = PositionManager::new(store);

        let position = manager
            .open_position(Uuid::now_v7(), btc(), Side::Long, dec!(1), dec!(50000))
            .await
            .unwrap();
        manager.close_position(position.id, dec!(51000)).await.unwrap();
        manager.store().close().await;
        position.id
    };

    let store = SqliteStore::open(&db_path, 4).await.unwrap();
    let manager = PositionManager::new(store);

    let record = manager.reconcile_with_exchange(&[]).await.unwrap();
    assert_eq!(record.discrepancies_found, 0);

    let position = manager.get_position(position_id).await.unwrap().unwrap();
    assert_eq!(position.status, PositionStatus::Closed);
    assert_eq!(position.realized_pnl, dec!(1000));
}

/// After a restart, a position the exchange stopped reporting is closed as a
/// phantom (single-confirmation config), with the audit event in place.
#[tokio::test]
async fn crash_recovery_removes_phantom_position() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("keeper.db");

    let position_id = {
        let store = SqliteStore::open(&db_path, 4).await.unwrap();
        let manager = PositionManager::new(store);
        let position = manager
            .open_position(Uuid::now_v7(), btc(), Side::Long, dec!(1), dec!(50000))
            .await
            .unwrap();
        manager.store().close().await;
        position.id
    };

    let store = SqliteStore::open(&db_path, 4).await.unwrap();
    let manager =
        PositionManager::with_config(store, ReconcileConfig { phantom_confirmations: 1 });

    let record = manager.reconcile_with_exchange(&[]).await.unwrap();
    assert_eq!(record.discrepancies_found, 1);
    assert_eq!(record.discrepancies_resolved, 1);

    let position = manager.get_position(position_id).await.unwrap().unwrap();
    assert_eq!(position.status, PositionStatus::Closed);

    let events = manager.get_events(position_id).await.unwrap();
    assert!(events.iter().any(|e| e.payload.kind() == EventKind::Reconciled));
}

/// 10,000 positions opened concurrently across parallel workers must all
/// receive unique IDs and all be durably recorded.
#[tokio::test(flavor = "multi_thread")]
async fn concurrent_opens_generate_unique_ids() {
    const WORKERS: usize = 20;
    const OPENS_PER_WORKER: usize = 500;

    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("keeper.db");

    let store = SqliteStore::open(&db_path, 8).await.unwrap();
    let manager = Arc::new(PositionManager::new(store));

    let mut handles = Vec::with_capacity(WORKERS);
    for _ in 0..WORKERS {
        let manager = Arc::clone(&manager);
        handles.push(tokio::spawn(async move {
            let worker = Uuid::now_v7();
            let mut ids = Vec::with_capacity(OPENS_PER_WORKER);
            for _ in 0..OPENS_PER_WORKER {
                let position = manager
                    .open_position(worker, btc(), Side::Long, dec!(0.01), dec!(50000))
                    .await
                    .unwrap();
                ids.push(position.id);
            }
            ids
        }));
    }

    let mut all_ids = HashSet::new();
    for handle in handles {
        for id in handle.await.unwrap() {
            assert!(all_ids.insert(id), "duplicate position id generated");
        }
    }

    assert_eq!(all_ids.len(), WORKERS * OPENS_PER_WORKER);

    // Every open landed durably: one row and one OPENED event apiece
    let metrics = manager.get_performance_metrics().await.unwrap();
    assert_eq!(metrics.open_positions, (WORKERS * OPENS_PER_WORKER) as i64);
    assert_eq!(metrics.event_count, (WORKERS * OPENS_PER_WORKER) as i64);
}
