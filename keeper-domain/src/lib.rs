//! Keeper Domain Layer
//!
//! Pure domain logic with zero I/O dependencies.
//! Contains entities, value objects, and the position event model.

#![warn(clippy::all)]

// Public modules
pub mod entities;
pub mod events;
pub mod value_objects;

// Re-export commonly used types
pub use entities::{
    CheckResult, ExchangePosition, HealthEntry, Position, PositionId, PositionStatus,
    ReconciliationRecord, ReconciliationStatus, WorkerId,
};
pub use events::{EventKind, EventPayload, PositionEvent, ReconcileReason, replay};
pub use value_objects::{DomainError, OrderSide, Price, Quantity, Side, Symbol};
