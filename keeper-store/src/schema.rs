//! Embedded database schema.
//!
//! One SQLite file holds four tables: current positions, the append-only
//! event log, reconciliation history, and the health log. Migrations are
//! additive only (new nullable columns); historical event payloads must stay
//! readable forever.

use crate::error::StoreError;
use sqlx::SqlitePool;

/// Current schema version, stamped into `PRAGMA user_version`.
pub const SCHEMA_VERSION: i32 = 1;

const SCHEMA_POSITIONS: &str = r#"
CREATE TABLE IF NOT EXISTS positions (
    position_id     TEXT PRIMARY KEY,
    owner_worker_id TEXT NOT NULL,
    symbol          TEXT NOT NULL,
    side            TEXT NOT NULL,
    status          TEXT NOT NULL,
    quantity        TEXT NOT NULL,
    entry_price     TEXT NOT NULL,
    current_price   TEXT NOT NULL,
    realized_pnl    TEXT NOT NULL,
    unrealized_pnl  TEXT NOT NULL,
    opened_at       TEXT NOT NULL,
    closed_at       TEXT,
    updated_at      TEXT NOT NULL
);
"#;

const SCHEMA_POSITION_EVENTS: &str = r#"
CREATE TABLE IF NOT EXISTS position_events (
    event_id    INTEGER PRIMARY KEY AUTOINCREMENT,
    position_id TEXT NOT NULL,
    event_type  TEXT NOT NULL,
    payload     TEXT NOT NULL,
    created_at  TEXT NOT NULL
);
"#;

const SCHEMA_RECONCILIATION_LOG: &str = r#"
CREATE TABLE IF NOT EXISTS reconciliation_log (
    run_id                  TEXT PRIMARY KEY,
    started_at              TEXT NOT NULL,
    completed_at            TEXT NOT NULL,
    local_position_count    INTEGER NOT NULL,
    exchange_position_count INTEGER NOT NULL,
    discrepancies_found     INTEGER NOT NULL,
    discrepancies_resolved  INTEGER NOT NULL,
    status                  TEXT NOT NULL
);
"#;

const SCHEMA_HEALTH_LOG: &str = r#"
CREATE TABLE IF NOT EXISTS health_log (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp  TEXT NOT NULL,
    component  TEXT NOT NULL,
    check_name TEXT NOT NULL,
    result     TEXT NOT NULL,
    detail     TEXT NOT NULL
);
"#;

const INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_positions_status ON positions (status)",
    "CREATE INDEX IF NOT EXISTS idx_positions_owner ON positions (owner_worker_id, status)",
    "CREATE INDEX IF NOT EXISTS idx_events_position ON position_events (position_id, event_id)",
];

/// Create tables and indexes if they do not exist, and stamp the schema
/// version.
pub async fn migrate(pool: &SqlitePool) -> Result<(), StoreError> {
    for statement in [
        SCHEMA_POSITIONS,
        SCHEMA_POSITION_EVENTS,
        SCHEMA_RECONCILIATION_LOG,
        SCHEMA_HEALTH_LOG,
    ] {
        sqlx::query(statement).execute(pool).await?;
    }

    for statement in INDEXES {
        sqlx::query(statement).execute(pool).await?;
    }

    sqlx::query(&format!("PRAGMA user_version = {}", SCHEMA_VERSION))
        .execute(pool)
        .await?;

    Ok(())
}
