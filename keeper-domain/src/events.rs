//! Position events for keeper.
//!
//! Events are immutable records of state changes: the audit trail and the
//! recovery mechanism after a crash. Every payload carries a full snapshot
//! of the position at event time, so current state is reconstructable by
//! replaying a position's events in order.

use crate::entities::{Position, PositionId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A stored position event. `event_id` is assigned by the store and is
/// monotonic across the whole log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionEvent {
    pub event_id: i64,
    pub position_id: PositionId,
    pub payload: EventPayload,
    pub created_at: DateTime<Utc>,
}

/// Event kinds in the position log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Opened,
    Adjusted,
    Closed,
    Reconciled,
    AnomalyDetected,
}

impl EventKind {
    /// Stable name used in storage
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Opened => "opened",
            EventKind::Adjusted => "adjusted",
            EventKind::Closed => "closed",
            EventKind::Reconciled => "reconciled",
            EventKind::AnomalyDetected => "anomaly_detected",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a RECONCILED event was written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileReason {
    /// Local position absent from the exchange snapshot: closed locally
    PhantomRemoved,
    /// Exchange position absent locally: created from the exchange's view
    AdoptedFromExchange,
}

impl ReconcileReason {
    /// Human-readable reason recorded in the event payload
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileReason::PhantomRemoved => "phantom position removed",
            ReconcileReason::AdoptedFromExchange => "adopted from exchange",
        }
    }
}

/// Structured event payload, serialized to JSON in the event log.
///
/// Every variant embeds the post-event position snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    /// Position created from a confirmed fill
    Opened { snapshot: Position },

    /// Price mark and/or quantity adjustment applied
    Adjusted {
        quantity_delta: Decimal,
        snapshot: Position,
    },

    /// Position closed with realized P&L
    Closed {
        exit_price: Decimal,
        realized_pnl: Decimal,
        snapshot: Position,
    },

    /// Reconciliation created or closed this position
    Reconciled {
        reason: ReconcileReason,
        snapshot: Position,
    },

    /// Local and exchange state diverged; local repaired to match
    AnomalyDetected {
        field: String,
        local_value: Decimal,
        exchange_value: Decimal,
        drift: Decimal,
        snapshot: Position,
    },
}

impl EventPayload {
    /// Event kind for this payload
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::Opened { .. } => EventKind::Opened,
            EventPayload::Adjusted { .. } => EventKind::Adjusted,
            EventPayload::Closed { .. } => EventKind::Closed,
            EventPayload::Reconciled { .. } => EventKind::Reconciled,
            EventPayload::AnomalyDetected { .. } => EventKind::AnomalyDetected,
        }
    }

    /// The position snapshot embedded in this payload
    pub fn snapshot(&self) -> &Position {
        match self {
            EventPayload::Opened { snapshot }
            | EventPayload::Adjusted { snapshot, .. }
            | EventPayload::Closed { snapshot, .. }
            | EventPayload::Reconciled { snapshot, .. }
            | EventPayload::AnomalyDetected { snapshot, .. } => snapshot,
        }
    }
}

/// Reconstruct a position's state by replaying its events in order.
///
/// Returns `None` for an empty event stream. Events must belong to a single
/// position and be in `event_id` order (the store's query guarantees both).
pub fn replay(events: &[PositionEvent]) -> Option<Position> {
    let mut state: Option<Position> = None;
    for event in events {
        state = Some(event.payload.snapshot().clone());
    }
    state
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value_objects::{Price, Quantity, Side, Symbol};
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn sample_position() -> Position {
        Position::open(
            Uuid::now_v7(),
            Symbol::from_pair("BTCUSDT").unwrap(),
            Side::Long,
            Quantity::new(dec!(1)).unwrap(),
            Price::new(dec!(50000)).unwrap(),
        )
    }

    fn event(event_id: i64, payload: EventPayload) -> PositionEvent {
        PositionEvent {
            event_id,
            position_id: payload.snapshot().id,
            payload,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_payload_kind_mapping() {
        let snapshot = sample_position();

        let opened = EventPayload::Opened { snapshot: snapshot.clone() };
        assert_eq!(opened.kind(), EventKind::Opened);

        let anomaly = EventPayload::AnomalyDetected {
            field: "quantity".to_string(),
            local_value: dec!(2),
            exchange_value: dec!(1.5),
            drift: dec!(0.5),
            snapshot,
        };
        assert_eq!(anomaly.kind(), EventKind::AnomalyDetected);
    }

    #[test]
    fn test_payload_json_roundtrip() {
        let snapshot = sample_position();
        let payload = EventPayload::Closed {
            exit_price: dec!(51000),
            realized_pnl: dec!(1000),
            snapshot,
        };

        let json = serde_json::to_string(&payload).unwrap();
        assert!(json.contains("\"type\":\"closed\""));

        let parsed: EventPayload = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, payload);
    }

    #[test]
    fn test_reconcile_reason_strings() {
        assert_eq!(ReconcileReason::PhantomRemoved.as_str(), "phantom position removed");
        assert_eq!(ReconcileReason::AdoptedFromExchange.as_str(), "adopted from exchange");
    }

    #[test]
    fn test_replay_returns_latest_snapshot() {
        let mut position = sample_position();
        let opened = event(1, EventPayload::Opened { snapshot: position.clone() });

        position.current_price = Price::new(dec!(51000)).unwrap();
        position.unrealized_pnl = dec!(1000);
        let adjusted = event(
            2,
            EventPayload::Adjusted { quantity_delta: dec!(0), snapshot: position.clone() },
        );

        let replayed = replay(&[opened, adjusted]).unwrap();
        assert_eq!(replayed, position);

        assert!(replay(&[]).is_none());
    }
}
