//! Daemon: main runtime orchestrator.
//!
//! Ties the components together and enforces the process lifecycle:
//!
//! 1. Load configuration, open the store
//! 2. Reconcile against a fresh exchange snapshot **before any worker runs**
//! 3. Self-diagnose stored state
//! 4. Spawn workers; re-run reconciliation on an interval
//! 5. Graceful shutdown on ctrl-c: workers stop, in-flight transactions
//!    finish, the pool closes so WAL checkpointing completes

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info};

use keeper_domain::ReconciliationRecord;
use keeper_exchange::{
    BinanceVenue, ExchangeAdapter, FillSink, RateLimiter, StubVenue, VenuePort,
};
use keeper_manager::{PositionManager, ReconcileConfig};
use keeper_store::SqliteStore;
use keeper_worker::{TradingWorker, WorkerRunner};

use crate::config::{Config, Environment};
use crate::error::{DaemonError, DaemonResult};

// =============================================================================
// Daemon
// =============================================================================

/// The main keeper daemon.
pub struct Daemon<V: VenuePort + 'static> {
    config: Config,
    manager: Arc<PositionManager>,
    adapter: Arc<ExchangeAdapter<V>>,
}

impl Daemon<StubVenue> {
    /// Create a daemon over the stub venue (test/development).
    pub async fn new_stub(config: Config) -> DaemonResult<Self> {
        let venue = Arc::new(StubVenue::new(rust_decimal_macros::dec!(50000)));
        Self::build(config, venue).await
    }

    /// Create a daemon over a pre-configured stub venue.
    pub async fn new_with_stub(config: Config, venue: Arc<StubVenue>) -> DaemonResult<Self> {
        Self::build(config, venue).await
    }
}

impl Daemon<BinanceVenue> {
    /// Create a daemon over the real venue (production).
    pub async fn new_binance(config: Config) -> DaemonResult<Self> {
        let api_key = config
            .exchange
            .api_key
            .clone()
            .ok_or_else(|| DaemonError::Config("KEEPER_BINANCE_API_KEY is required".to_string()))?;
        let api_secret = config
            .exchange
            .api_secret
            .clone()
            .ok_or_else(|| DaemonError::Config("KEEPER_BINANCE_API_SECRET is required".to_string()))?;

        let venue = Arc::new(BinanceVenue::new(api_key, api_secret));
        Self::build(config, venue).await
    }
}

impl<V: VenuePort + 'static> Daemon<V> {
    /// Wire store, manager, limiter, and adapter over the given venue.
    pub async fn build(config: Config, venue: Arc<V>) -> DaemonResult<Self> {
        let store = SqliteStore::open(&config.store.path, config.store.max_connections).await?;

        let manager = Arc::new(PositionManager::with_config(
            store,
            ReconcileConfig {
                phantom_confirmations: config.reconcile.phantom_confirmations,
            },
        ));

        let limiter = Arc::new(RateLimiter::new(
            config.exchange.requests_per_second,
            std::time::Duration::from_secs(1),
        ));

        let adapter = Arc::new(ExchangeAdapter::new(
            venue,
            limiter,
            Arc::clone(&manager) as Arc<dyn FillSink>,
        ));

        Ok(Self { config, manager, adapter })
    }

    /// The position state manager.
    pub fn manager(&self) -> &Arc<PositionManager> {
        &self.manager
    }

    /// The exchange adapter.
    pub fn adapter(&self) -> &Arc<ExchangeAdapter<V>> {
        &self.adapter
    }

    /// Reconcile local state against a fresh exchange snapshot.
    pub async fn reconcile_once(&self) -> DaemonResult<ReconciliationRecord> {
        let snapshot = self.adapter.get_open_positions().await?;
        Ok(self.manager.reconcile_with_exchange(&snapshot).await?)
    }

    /// Run the daemon until ctrl-c.
    ///
    /// Workers are boxed strategies; the daemon spawns each on its own task
    /// after the startup reconciliation pass.
    pub async fn run(self, workers: Vec<Box<dyn TradingWorker<V>>>) -> DaemonResult<()> {
        info!(
            version = env!("CARGO_PKG_VERSION"),
            environment = %self.config.environment,
            db_path = %self.config.store.path.display(),
            "Starting keeper daemon"
        );

        // Reconcile and diagnose BEFORE any worker can trade
        let record = self.reconcile_once().await?;
        info!(
            discrepancies_found = record.discrepancies_found,
            discrepancies_resolved = record.discrepancies_resolved,
            "Startup reconciliation complete"
        );
        self.manager.self_diagnose().await?;

        // Spawn workers
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let runner = WorkerRunner::new(
            Arc::clone(&self.adapter),
            Arc::clone(&self.manager),
            self.config.worker.tick_interval,
        );

        let mut handles = Vec::with_capacity(workers.len());
        for worker in workers {
            handles.push(runner.spawn(worker, shutdown_rx.clone()));
        }
        info!(workers = handles.len(), "Workers spawned");

        // Periodic reconciliation until shutdown
        let mut reconcile_interval = tokio::time::interval(self.config.reconcile.interval);
        reconcile_interval.tick().await; // first tick fires immediately; already reconciled

        loop {
            tokio::select! {
                _ = reconcile_interval.tick() => {
                    if let Err(e) = self.reconcile_once().await {
                        error!(error = %e, "Periodic reconciliation failed");
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Received shutdown signal");
                    break;
                }
            }
        }

        // Graceful shutdown: stop ticks, wait for in-flight work, close pool
        let _ = shutdown_tx.send(true);
        for handle in handles {
            let _ = handle.await;
        }
        self.manager.store().close().await;
        info!("Shutdown complete");

        Ok(())
    }
}

/// Pick the venue by environment and run.
pub async fn run_from_config(config: Config) -> DaemonResult<()> {
    match config.environment {
        Environment::Production => {
            let daemon = Daemon::new_binance(config).await?;
            // Strategy workers register through the library API; the bare
            // daemon maintains the reconciled position record.
            daemon.run(Vec::new()).await
        }
        Environment::Test | Environment::Development => {
            let daemon = Daemon::new_stub(config).await?;
            daemon.run(Vec::new()).await
        }
    }
}
