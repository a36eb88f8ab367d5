//! Keeper daemon
//!
//! Maintains the crash-durable, reconciled record of positions for a fleet
//! of trading workers.
//!
//! # Usage
//!
//! ```bash
//! # Start with default configuration (stub venue)
//! cargo run -p keeperd
//!
//! # Production against the real venue
//! KEEPER_ENV=production KEEPER_BINANCE_API_KEY=... KEEPER_BINANCE_API_SECRET=... \
//!     cargo run -p keeperd
//! ```
//!
//! # Environment Variables
//!
//! - `KEEPER_ENV`: Environment (test, development, production)
//! - `KEEPER_DB_PATH`: Database file (default: keeper.db)
//! - `KEEPER_DB_MAX_CONNECTIONS`: Pool bound (default: 8)
//! - `KEEPER_REQUESTS_PER_SECOND`: Venue request budget (default: 10)
//! - `KEEPER_RECONCILE_INTERVAL_SECS`: Reconciliation cadence (default: 300)
//! - `KEEPER_PHANTOM_CONFIRMATIONS`: Missing snapshots before a phantom
//!   close (default: 2)
//! - `KEEPER_BINANCE_API_KEY` / `KEEPER_BINANCE_API_SECRET`: venue
//!   credentials (production)

use keeperd::{run_from_config, Config};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("keeperd=info".parse()?))
        .init();

    // Load configuration
    let config = Config::from_env()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = %config.environment,
        db_path = %config.store.path.display(),
        "Keeper daemon"
    );

    run_from_config(config).await?;

    Ok(())
}
