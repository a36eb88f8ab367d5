//! Keeper Storage Layer
//!
//! Durable persistence for positions, the append-only event log,
//! reconciliation history, and the health log.
//!
//! # Architecture
//!
//! - **SqliteStore**: one embedded database file, WAL journal mode, bounded
//!   connection pool
//! - **Transactional writes**: free functions taking the caller's
//!   transaction, so a position row update and its event append commit
//!   together or not at all
//! - **Schema**: additive migrations only; historical event payloads stay
//!   readable
//!
//! # Usage
//!
//! ```rust,ignore
//! use keeper_store::{self as store, SqliteStore};
//!
//! let db = SqliteStore::open("keeper.db", 8).await?;
//! let mut tx = db.begin().await?;
//! store::insert_position(&mut tx, &position).await?;
//! store::append_event(&mut tx, &payload).await?;
//! tx.commit().await?;
//! ```

#![warn(clippy::all)]

// Modules
mod error;
mod schema;
mod sqlite;

// Re-exports
pub use error::StoreError;
pub use schema::{migrate, SCHEMA_VERSION};
pub use sqlite::{
    append_event, insert_position, insert_reconciliation, update_position, SqliteStore,
};
