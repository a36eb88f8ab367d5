//! Domain entities for keeper.
//!
//! Core business entities with lifecycle management.
//! All entities have identity and state transitions.

use crate::value_objects::{DomainError, Price, Quantity, Side, Symbol};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// Identifiers
// =============================================================================

/// Unique identifier for a Position
pub type PositionId = Uuid;

/// Unique identifier for a trading worker
pub type WorkerId = Uuid;

// =============================================================================
// Position
// =============================================================================

/// Position represents the system's durable belief about a held quantity
/// of an asset at the venue.
///
/// Key properties:
/// - Created only when a worker's order is confirmed filled
/// - Never deleted: closed positions are retained with status `Closed`
/// - All mutations go through the state manager in a single transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: PositionId,
    pub owner_worker_id: WorkerId,
    pub symbol: Symbol,
    pub side: Side,
    pub status: PositionStatus,

    pub quantity: Quantity,
    pub entry_price: Price,
    pub current_price: Price,

    // P&L tracking
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,

    // Audit
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Position {
    /// Create a new open position from a confirmed fill
    pub fn open(
        owner_worker_id: WorkerId,
        symbol: Symbol,
        side: Side,
        quantity: Quantity,
        entry_price: Price,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            owner_worker_id,
            symbol,
            side,
            status: PositionStatus::Open,
            quantity,
            entry_price,
            current_price: entry_price,
            realized_pnl: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            opened_at: now,
            closed_at: None,
            updated_at: now,
        }
    }

    /// Check if position is open (or closing, i.e. still held)
    pub fn is_held(&self) -> bool {
        matches!(self.status, PositionStatus::Open | PositionStatus::Closing)
    }

    /// Check if position is closed
    pub fn is_closed(&self) -> bool {
        matches!(self.status, PositionStatus::Closed)
    }

    /// Unrealized P&L at the given mark price
    ///
    /// `(mark - entry) * quantity * direction_sign`
    pub fn unrealized_at(&self, mark: Price) -> Decimal {
        (mark.as_decimal() - self.entry_price.as_decimal())
            * self.quantity.as_decimal()
            * self.side.sign()
    }

    /// Realized P&L if closed at the given exit price
    pub fn realized_at(&self, exit: Price) -> Decimal {
        (exit.as_decimal() - self.entry_price.as_decimal())
            * self.quantity.as_decimal()
            * self.side.sign()
    }

    /// Whether this row matches an exchange-reported position (by symbol+side)
    pub fn matches_exchange(&self, exchange: &ExchangePosition) -> bool {
        self.symbol == exchange.symbol && self.side == exchange.side
    }
}

/// Position lifecycle status
///
/// `Open → Closing → Closed` or `Open → Closed` (reconciliation or direct
/// close). `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus {
    /// Position is held, exit not yet requested
    Open,
    /// Exit order submitted, fill not yet confirmed
    Closing,
    /// Position fully closed, P&L realized (terminal)
    Closed,
}

impl PositionStatus {
    /// Stable lowercase name used in storage
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionStatus::Open => "open",
            PositionStatus::Closing => "closing",
            PositionStatus::Closed => "closed",
        }
    }

    /// Parse from the stable storage name
    pub fn parse(s: &str) -> Result<Self, DomainError> {
        match s {
            "open" => Ok(PositionStatus::Open),
            "closing" => Ok(PositionStatus::Closing),
            "closed" => Ok(PositionStatus::Closed),
            other => Err(DomainError::InvalidStatus(other.to_string())),
        }
    }
}

// =============================================================================
// Exchange observation
// =============================================================================

/// A position as reported by the exchange.
///
/// This is an observation, not a record: the state manager compares these
/// against its own rows during reconciliation and never stores them directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangePosition {
    pub symbol: Symbol,
    pub side: Side,
    pub quantity: Quantity,
    pub entry_price: Price,
}

// =============================================================================
// Reconciliation record
// =============================================================================

/// Summary of one reconciliation run, persisted for audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationRecord {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub local_position_count: u32,
    pub exchange_position_count: u32,
    pub discrepancies_found: u32,
    pub discrepancies_resolved: u32,
    pub status: ReconciliationStatus,
}

/// Outcome of a reconciliation run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconciliationStatus {
    /// Local and exchange state agreed
    Clean,
    /// Discrepancies were found and repaired
    Repaired,
}

impl ReconciliationStatus {
    /// Stable lowercase name used in storage
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconciliationStatus::Clean => "clean",
            ReconciliationStatus::Repaired => "repaired",
        }
    }

    /// Parse from the stable storage name
    pub fn parse(s: &str) -> Result<Self, DomainError> {
        match s {
            "clean" => Ok(ReconciliationStatus::Clean),
            "repaired" => Ok(ReconciliationStatus::Repaired),
            other => Err(DomainError::InvalidStatus(other.to_string())),
        }
    }
}

// =============================================================================
// Health log
// =============================================================================

/// One self-diagnosis check outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthEntry {
    pub timestamp: DateTime<Utc>,
    pub component: String,
    pub check_name: String,
    pub result: CheckResult,
    pub detail: String,
}

impl HealthEntry {
    /// Record a passing check
    pub fn pass(component: &str, check_name: &str, detail: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            component: component.to_string(),
            check_name: check_name.to_string(),
            result: CheckResult::Pass,
            detail: detail.into(),
        }
    }

    /// Record a failing check (needs operator follow-up)
    pub fn fail(component: &str, check_name: &str, detail: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            component: component.to_string(),
            check_name: check_name.to_string(),
            result: CheckResult::Fail,
            detail: detail.into(),
        }
    }
}

/// PASS/FAIL result of a health check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckResult {
    Pass,
    Fail,
}

impl CheckResult {
    /// Stable name used in storage
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckResult::Pass => "pass",
            CheckResult::Fail => "fail",
        }
    }

    /// Parse from the stable storage name
    pub fn parse(s: &str) -> Result<Self, DomainError> {
        match s {
            "pass" => Ok(CheckResult::Pass),
            "fail" => Ok(CheckResult::Fail),
            other => Err(DomainError::InvalidStatus(other.to_string())),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn btc_long(qty: Decimal, entry: Decimal) -> Position {
        Position::open(
            Uuid::now_v7(),
            Symbol::from_pair("BTCUSDT").unwrap(),
            Side::Long,
            Quantity::new(qty).unwrap(),
            Price::new(entry).unwrap(),
        )
    }

    #[test]
    fn test_open_position_defaults() {
        let position = btc_long(dec!(1), dec!(50000));

        assert_eq!(position.status, PositionStatus::Open);
        assert!(position.is_held());
        assert!(!position.is_closed());
        assert_eq!(position.current_price, position.entry_price);
        assert_eq!(position.realized_pnl, Decimal::ZERO);
        assert!(position.closed_at.is_none());
    }

    #[test]
    fn test_unrealized_pnl_long() {
        let position = btc_long(dec!(2), dec!(50000));
        let mark = Price::new(dec!(51000)).unwrap();

        // (51000 - 50000) * 2 * +1
        assert_eq!(position.unrealized_at(mark), dec!(2000));
    }

    #[test]
    fn test_realized_pnl_short() {
        let mut position = btc_long(dec!(1), dec!(50000));
        position.side = Side::Short;

        let exit = Price::new(dec!(48000)).unwrap();
        // (48000 - 50000) * 1 * -1
        assert_eq!(position.realized_at(exit), dec!(2000));
    }

    #[test]
    fn test_matches_exchange() {
        let position = btc_long(dec!(1), dec!(50000));

        let same = ExchangePosition {
            symbol: Symbol::from_pair("BTCUSDT").unwrap(),
            side: Side::Long,
            quantity: Quantity::new(dec!(1)).unwrap(),
            entry_price: Price::new(dec!(50000)).unwrap(),
        };
        assert!(position.matches_exchange(&same));

        let other_side = ExchangePosition { side: Side::Short, ..same.clone() };
        assert!(!position.matches_exchange(&other_side));
    }

    #[test]
    fn test_status_storage_roundtrip() {
        for status in [PositionStatus::Open, PositionStatus::Closing, PositionStatus::Closed] {
            assert_eq!(PositionStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(PositionStatus::parse("half-open").is_err());
    }

    #[test]
    fn test_position_ids_unique() {
        let a = btc_long(dec!(1), dec!(50000));
        let b = btc_long(dec!(1), dec!(50000));
        assert_ne!(a.id, b.id);
    }
}
