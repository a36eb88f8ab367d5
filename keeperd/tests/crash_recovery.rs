//! End-to-end crash recovery through the daemon wiring.
//!
//! Uses the stub venue and an on-disk database: dropping the daemon and
//! rebuilding it over the same file simulates a process crash and restart.

use std::sync::Arc;

use rust_decimal_macros::dec;

use keeper_domain::{ExchangePosition, PositionStatus, Price, Quantity, Side, Symbol};
use keeper_exchange::{OrderType, StubVenue};
use keeper_worker::WorkerContext;
use keeperd::{Config, Daemon};

fn btc() -> Symbol {
    Symbol::from_pair("BTCUSDT").unwrap()
}

fn stub_btc_long(quantity: rust_decimal::Decimal) -> ExchangePosition {
    ExchangePosition {
        symbol: btc(),
        side: Side::Long,
        quantity: Quantity::new(quantity).unwrap(),
        entry_price: Price::new(dec!(50000)).unwrap(),
    }
}

/// Startup reconciliation adopts whatever the venue reports before any
/// worker gets to trade.
#[tokio::test]
async fn startup_reconciliation_adopts_exchange_positions() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::test(dir.path().join("keeper.db"));

    let venue = Arc::new(StubVenue::new(dec!(50000)));
    venue.set_positions(vec![stub_btc_long(dec!(0.75))]);

    let daemon = Daemon::new_with_stub(config, venue).await.unwrap();

    let record = daemon.reconcile_once().await.unwrap();
    assert_eq!(record.discrepancies_found, 1);
    assert_eq!(record.discrepancies_resolved, 1);

    let open = daemon.manager().get_open_positions(None, 10, 0).await.unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].quantity.as_decimal(), dec!(0.75));

    // A second pass over the same snapshot changes nothing
    let second = daemon.reconcile_once().await.unwrap();
    assert_eq!(second.discrepancies_found, 0);
}

/// A position opened through the worker path survives a crash and restart
/// unduplicated, as long as the venue still reports it.
#[tokio::test]
async fn open_position_survives_daemon_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("keeper.db");

    let position_id = {
        let venue = Arc::new(StubVenue::new(dec!(50000)));
        let daemon = Daemon::new_with_stub(Config::test(&db_path), Arc::clone(&venue))
            .await
            .unwrap();

        let ctx = WorkerContext::new(
            "recovery-test",
            Arc::clone(daemon.adapter()),
            Arc::clone(daemon.manager()),
        );
        let position = ctx
            .place_order(btc(), Side::Long, dec!(1), OrderType::Market)
            .await
            .unwrap();

        daemon.manager().store().close().await;
        position.id
        // Daemon dropped: the "crash"
    };

    // Restart with the venue still reporting the position
    let venue = Arc::new(StubVenue::new(dec!(50000)));
    venue.set_positions(vec![stub_btc_long(dec!(1))]);
    let daemon = Daemon::new_with_stub(Config::test(&db_path), venue).await.unwrap();

    let record = daemon.reconcile_once().await.unwrap();
    assert_eq!(record.discrepancies_found, 0);

    let open = daemon.manager().get_open_positions(None, 10, 0).await.unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].id, position_id);
    assert_eq!(open[0].status, PositionStatus::Open);
}

/// After a restart, a position the venue no longer reports is closed as a
/// phantom (test config uses a single-confirmation window).
#[tokio::test]
async fn restart_removes_position_venue_no_longer_reports() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("keeper.db");

    let position_id = {
        let venue = Arc::new(StubVenue::new(dec!(50000)));
        let daemon = Daemon::new_with_stub(Config::test(&db_path), venue).await.unwrap();

        let ctx = WorkerContext::new(
            "phantom-test",
            Arc::clone(daemon.adapter()),
            Arc::clone(daemon.manager()),
        );
        let position = ctx
            .place_order(btc(), Side::Long, dec!(1), OrderType::Market)
            .await
            .unwrap();

        daemon.manager().store().close().await;
        position.id
    };

    // Restart; the venue reports nothing
    let venue = Arc::new(StubVenue::new(dec!(50000)));
    let daemon = Daemon::new_with_stub(Config::test(&db_path), venue).await.unwrap();

    let record = daemon.reconcile_once().await.unwrap();
    assert_eq!(record.discrepancies_resolved, 1);

    let position = daemon.manager().get_position(position_id).await.unwrap().unwrap();
    assert_eq!(position.status, PositionStatus::Closed);
    assert!(daemon.manager().get_open_positions(None, 10, 0).await.unwrap().is_empty());
}
