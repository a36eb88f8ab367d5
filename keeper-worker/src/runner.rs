//! Worker runner: drives strategies on an interval.
//!
//! Each worker runs on its own tokio task with its own context; workers
//! share nothing mutable except the store pool and the process-wide rate
//! limiter, both behind their owning components.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use keeper_exchange::{ExchangeAdapter, VenuePort};
use keeper_manager::PositionManager;

use crate::context::WorkerContext;
use crate::error::WorkerResult;

/// A trading strategy. Implementations decide; the context executes.
///
/// The trait deliberately receives only `&WorkerContext`: holding a venue
/// client of one's own is the design violation this boundary exists to
/// prevent.
#[async_trait]
pub trait TradingWorker<V: VenuePort>: Send {
    /// Worker display name (used for logging and task naming).
    fn name(&self) -> &str;

    /// One strategy step. Called on the runner's interval.
    async fn tick(&mut self, ctx: &WorkerContext<V>) -> WorkerResult<()>;
}

#[async_trait]
impl<V: VenuePort> TradingWorker<V> for Box<dyn TradingWorker<V>> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn tick(&mut self, ctx: &WorkerContext<V>) -> WorkerResult<()> {
        (**self).tick(ctx).await
    }
}

/// Spawns and drives trading workers.
pub struct WorkerRunner<V: VenuePort + 'static> {
    adapter: Arc<ExchangeAdapter<V>>,
    manager: Arc<PositionManager>,
    tick_interval: Duration,
}

impl<V: VenuePort + 'static> WorkerRunner<V> {
    /// Create a runner over the shared adapter/manager pair.
    pub fn new(
        adapter: Arc<ExchangeAdapter<V>>,
        manager: Arc<PositionManager>,
        tick_interval: Duration,
    ) -> Self {
        Self { adapter, manager, tick_interval }
    }

    /// Spawn a worker on its own task.
    ///
    /// The worker ticks until the shutdown signal flips; a failed tick is
    /// logged and the worker keeps running (a single bad tick must not
    /// kill the strategy).
    pub fn spawn<W>(&self, mut worker: W, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()>
    where
        W: TradingWorker<V> + 'static,
    {
        let ctx = WorkerContext::new(worker.name(), Arc::clone(&self.adapter), Arc::clone(&self.manager));
        let tick_interval = self.tick_interval;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick_interval);
            info!(worker = %ctx.name(), worker_id = %ctx.worker_id(), "Worker started");

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = worker.tick(&ctx).await {
                            error!(worker = %ctx.name(), error = %e, "Worker tick failed");
                        }
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            info!(worker = %ctx.name(), "Worker stopped");
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
