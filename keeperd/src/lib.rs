//! Keeper Daemon Library
//!
//! Runtime orchestrator for the keeper position state manager.
//!
//! # Architecture
//!
//! ```text
//! strategies → WorkerRunner → WorkerContext → ExchangeAdapter → venue
//!                                  │                │
//!                                  └── PositionManager (fills, queries)
//!                                           │
//!                                      SqliteStore (WAL)
//! ```
//!
//! # Components
//!
//! - **Daemon**: wiring, startup reconciliation, periodic reconciliation,
//!   graceful shutdown
//! - **Config**: environment-based configuration
//!
//! # Example
//!
//! ```rust,ignore
//! use keeperd::{Config, Daemon};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let daemon = Daemon::new_stub(config).await?;
//!     daemon.run(Vec::new()).await?;
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod daemon;
pub mod error;

// Re-exports for convenience
pub use config::{Config, Environment, ExchangeConfig, ReconcileSettings, StoreConfig, WorkerSettings};
pub use daemon::{run_from_config, Daemon};
pub use error::{DaemonError, DaemonResult};
