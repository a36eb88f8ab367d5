//! Keeper Position State Manager
//!
//! The single, crash-durable, reconciled record of what positions the
//! worker fleet believes it holds.
//!
//! # Architecture
//!
//! ```text
//! Worker → Base → Exchange Adapter (fill) → PositionManager → SqliteStore
//!                                                 ↑
//!                         reconcile_with_exchange (startup + interval)
//! ```
//!
//! # Components
//!
//! - **PositionManager**: atomic open/adjust/close operations; sole writer
//!   of position and event rows
//! - **Reconciliation**: compares local state against the exchange's
//!   reported positions and self-heals drift (`reconcile.rs`)
//! - **Self-diagnosis**: invariant checks persisted to the health log
//!   (`diagnose.rs`)
//! - **Metrics**: read-only aggregates for monitoring (`metrics.rs`)

#![warn(clippy::all)]

pub mod diagnose;
pub mod error;
pub mod manager;
pub mod metrics;
pub mod reconcile;

// Re-exports for convenience
pub use error::{ManagerError, ManagerResult};
pub use manager::PositionManager;
pub use metrics::{PerformanceMetrics, WorkerPerformance};
pub use reconcile::{system_worker_id, ReconcileConfig};
