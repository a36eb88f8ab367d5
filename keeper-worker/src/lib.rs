//! Keeper Worker Boundary
//!
//! The enforcement layer every trading worker goes through. It owns no
//! state of its own; it is a capability boundary: the process constructs
//! one exchange adapter + position manager pair, and each worker receives
//! a [`WorkerContext`] exposing only the safe operations.
//!
//! # Architecture
//!
//! ```text
//! daemon → WorkerRunner::spawn(strategy) → WorkerContext
//!                                              ├── place_order
//!                                              ├── close_position
//!                                              ├── get_my_positions
//!                                              └── get_performance_metrics
//! ```

#![warn(clippy::all)]

pub mod context;
pub mod error;
pub mod runner;

// Re-exports for convenience
pub use context::WorkerContext;
pub use error::{WorkerError, WorkerResult};
pub use runner::{TradingWorker, WorkerRunner};
