//! Keeper Exchange Layer
//!
//! The only component permitted to talk to the trading venue.
//!
//! # Architecture
//!
//! ```text
//! Worker Base → ExchangeAdapter → RateLimiter → VenuePort → venue
//!                     │
//!                     └→ FillSink (position store) before success
//! ```
//!
//! # Components
//!
//! - **Ports**: `VenuePort`, the seam under which concrete venue protocol
//!   lives
//! - **Adapter**: rate limiting, bounded read retries, write-through fill
//!   recording
//! - **RateLimiter**: process-wide sliding window shared by all workers
//! - **BinanceVenue**: Binance isolated margin REST implementation
//! - **StubVenue**: test implementation with failure injection

#![warn(clippy::all)]

pub mod adapter;
pub mod binance;
pub mod error;
pub mod ports;
pub mod rate_limit;
pub mod stub;

// Re-exports for convenience
pub use adapter::{ExchangeAdapter, FillSink, OrderResult, RetryConfig};
pub use binance::BinanceVenue;
pub use error::{ExchangeError, ExchangeResult};
pub use ports::{OrderType, VenueFill, VenuePort};
pub use rate_limit::RateLimiter;
pub use stub::{PlacedOrder, StubVenue};
