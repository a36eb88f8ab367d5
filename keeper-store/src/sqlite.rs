//! Embedded SQLite store.
//!
//! One database file, opened in WAL mode behind a bounded connection pool:
//! readers proceed while a writer transaction is in flight, and a process
//! crash mid-write never leaves a partially committed state. All multi-row
//! writes (position row + event row) run inside a single transaction taken
//! from [`SqliteStore::begin`]; dropping an uncommitted transaction rolls it
//! back.
//!
//! Decimals are stored as TEXT (SQLite has no decimal type) and parsed on
//! read; UUIDs are stored as TEXT.

use crate::error::StoreError;
use crate::schema;
use chrono::{DateTime, Utc};
use keeper_domain::{
    CheckResult, EventPayload, HealthEntry, Position, PositionEvent, PositionId, PositionStatus,
    ReconciliationRecord, ReconciliationStatus, Side, Symbol, WorkerId,
};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// How long a connection waits on the write lock before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// SqliteStore
// =============================================================================

/// Handle to the embedded database.
///
/// Cheap to clone; all clones share the same pool.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) the database file and run migrations.
    ///
    /// `max_connections` bounds the pool in front of the single file; SQLite
    /// admits one writer at a time, so this mainly sizes concurrent readers.
    pub async fn open(path: impl AsRef<Path>, max_connections: u32) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(BUSY_TIMEOUT)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        schema::migrate(&pool).await?;

        info!(path = %path.as_ref().display(), max_connections, "Store opened (WAL mode)");

        Ok(Self { pool })
    }

    /// Open a private in-memory database (for tests).
    ///
    /// Pinned to a single pooled connection: an in-memory SQLite database
    /// lives and dies with its connection.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        schema::migrate(&pool).await?;

        Ok(Self { pool })
    }

    /// The underlying pool (for ad-hoc queries in tests).
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Begin a write transaction.
    ///
    /// Commit explicitly; a dropped transaction rolls back.
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>, StoreError> {
        self.pool
            .begin()
            .await
            .map_err(|e| StoreError::Transaction(e.to_string()))
    }

    /// Close the pool, letting in-flight transactions finish and the WAL
    /// checkpoint complete.
    pub async fn close(&self) {
        self.pool.close().await;
        debug!("Store closed");
    }

    // =========================================================================
    // Position reads
    // =========================================================================

    /// Fetch a single position by ID.
    pub async fn get_position(&self, id: PositionId) -> Result<Option<Position>, StoreError> {
        let row = sqlx::query("SELECT * FROM positions WHERE position_id = ?1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| map_position_row(&r)).transpose()
    }

    /// All positions still held (status open or closing), oldest first.
    ///
    /// Used by reconciliation, which must see the complete held set.
    pub async fn held_positions(&self) -> Result<Vec<Position>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM positions WHERE status IN ('open', 'closing') ORDER BY opened_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(map_position_row).collect()
    }

    /// Paginated open positions, optionally filtered by owning worker.
    ///
    /// Bounded query: never materializes the full position set.
    pub async fn open_positions(
        &self,
        owner: Option<WorkerId>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Position>, StoreError> {
        let rows = match owner {
            Some(worker_id) => {
                sqlx::query(
                    "SELECT * FROM positions \
                     WHERE status IN ('open', 'closing') AND owner_worker_id = ?1 \
                     ORDER BY opened_at ASC LIMIT ?2 OFFSET ?3",
                )
                .bind(worker_id.to_string())
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT * FROM positions \
                     WHERE status IN ('open', 'closing') \
                     ORDER BY opened_at ASC LIMIT ?1 OFFSET ?2",
                )
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.iter().map(map_position_row).collect()
    }

    /// Position counts grouped by status.
    pub async fn status_counts(&self) -> Result<HashMap<String, i64>, StoreError> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM positions GROUP BY status")
            .fetch_all(&self.pool)
            .await?;

        let mut counts = HashMap::new();
        for row in rows {
            let status: String = row.try_get("status")?;
            let n: i64 = row.try_get("n")?;
            counts.insert(status, n);
        }
        Ok(counts)
    }

    /// Realized P&L of every closed position, with its owning worker.
    pub async fn closed_pnl_rows(&self) -> Result<Vec<(WorkerId, Decimal)>, StoreError> {
        let rows = sqlx::query(
            "SELECT owner_worker_id, realized_pnl FROM positions WHERE status = 'closed'",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let worker = uuid_col(row, "owner_worker_id")?;
                let pnl = decimal_col(row, "realized_pnl")?;
                Ok((worker, pnl))
            })
            .collect()
    }

    // =========================================================================
    // Event log reads
    // =========================================================================

    /// All events for a position, in append order.
    pub async fn events_for_position(
        &self,
        position_id: PositionId,
    ) -> Result<Vec<PositionEvent>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM position_events WHERE position_id = ?1 ORDER BY event_id ASC",
        )
        .bind(position_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(map_event_row).collect()
    }

    /// Total number of events in the log.
    pub async fn event_count(&self) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM position_events")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Events whose position row does not exist (diagnosis input).
    pub async fn orphaned_events(&self) -> Result<Vec<(i64, String)>, StoreError> {
        let rows = sqlx::query(
            "SELECT e.event_id, e.position_id FROM position_events e \
             LEFT JOIN positions p ON p.position_id = e.position_id \
             WHERE p.position_id IS NULL",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let event_id: i64 = row.try_get("event_id")?;
                let position_id: String = row.try_get("position_id")?;
                Ok((event_id, position_id))
            })
            .collect()
    }

    /// Held rows whose stored quantity violates the positivity invariant
    /// (diagnosis input). Returns raw text since such rows cannot be mapped
    /// into domain types.
    pub async fn nonpositive_held_rows(&self) -> Result<Vec<(String, String)>, StoreError> {
        let rows = sqlx::query(
            "SELECT position_id, quantity FROM positions \
             WHERE status IN ('open', 'closing') AND CAST(quantity AS REAL) <= 0",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let id: String = row.try_get("position_id")?;
                let qty: String = row.try_get("quantity")?;
                Ok((id, qty))
            })
            .collect()
    }

    /// Held (symbol, side, owner) keys claimed by more than one row
    /// (diagnosis input). Reconciliation matches by symbol+side, so
    /// duplicates make matching ambiguous.
    pub async fn duplicate_held_keys(&self) -> Result<Vec<(String, String, i64)>, StoreError> {
        let rows = sqlx::query(
            "SELECT symbol, side, COUNT(*) AS n FROM positions \
             WHERE status IN ('open', 'closing') \
             GROUP BY symbol, side HAVING COUNT(*) > 1",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let symbol: String = row.try_get("symbol")?;
                let side: String = row.try_get("side")?;
                let n: i64 = row.try_get("n")?;
                Ok((symbol, side, n))
            })
            .collect()
    }

    /// Closed rows missing their close timestamp (diagnosis input).
    pub async fn closed_without_timestamp(&self) -> Result<Vec<PositionId>, StoreError> {
        let rows = sqlx::query(
            "SELECT position_id FROM positions WHERE status = 'closed' AND closed_at IS NULL",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(|row| uuid_col(row, "position_id")).collect()
    }

    // =========================================================================
    // Reconciliation log
    // =========================================================================

    /// Most recent reconciliation run, if any.
    pub async fn latest_reconciliation(&self) -> Result<Option<ReconciliationRecord>, StoreError> {
        let row = sqlx::query(
            "SELECT * FROM reconciliation_log ORDER BY started_at DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| map_reconciliation_row(&r)).transpose()
    }

    // =========================================================================
    // Health log
    // =========================================================================

    /// Append a health check outcome.
    pub async fn record_health(&self, entry: &HealthEntry) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO health_log (timestamp, component, check_name, result, detail) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(entry.timestamp)
        .bind(&entry.component)
        .bind(&entry.check_name)
        .bind(entry.result.as_str())
        .bind(&entry.detail)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Most recent health entries, newest first.
    pub async fn health_entries(&self, limit: i64) -> Result<Vec<HealthEntry>, StoreError> {
        let rows = sqlx::query("SELECT * FROM health_log ORDER BY id DESC LIMIT ?1")
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(map_health_row).collect()
    }
}

// =============================================================================
// Transactional writes
// =============================================================================

/// Insert a new position row.
pub async fn insert_position(
    tx: &mut Transaction<'_, Sqlite>,
    position: &Position,
) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO positions (\
            position_id, owner_worker_id, symbol, side, status, \
            quantity, entry_price, current_price, realized_pnl, unrealized_pnl, \
            opened_at, closed_at, updated_at\
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
    )
    .bind(position.id.to_string())
    .bind(position.owner_worker_id.to_string())
    .bind(position.symbol.as_pair())
    .bind(position.side.as_str())
    .bind(position.status.as_str())
    .bind(position.quantity.as_decimal().to_string())
    .bind(position.entry_price.as_decimal().to_string())
    .bind(position.current_price.as_decimal().to_string())
    .bind(position.realized_pnl.to_string())
    .bind(position.unrealized_pnl.to_string())
    .bind(position.opened_at)
    .bind(position.closed_at)
    .bind(position.updated_at)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Update an existing position row in place.
///
/// The row must exist; this never inserts.
pub async fn update_position(
    tx: &mut Transaction<'_, Sqlite>,
    position: &Position,
) -> Result<(), StoreError> {
    let result = sqlx::query(
        "UPDATE positions SET \
            status = ?2, quantity = ?3, entry_price = ?4, current_price = ?5, \
            realized_pnl = ?6, unrealized_pnl = ?7, closed_at = ?8, updated_at = ?9 \
         WHERE position_id = ?1",
    )
    .bind(position.id.to_string())
    .bind(position.status.as_str())
    .bind(position.quantity.as_decimal().to_string())
    .bind(position.entry_price.as_decimal().to_string())
    .bind(position.current_price.as_decimal().to_string())
    .bind(position.realized_pnl.to_string())
    .bind(position.unrealized_pnl.to_string())
    .bind(position.closed_at)
    .bind(position.updated_at)
    .execute(&mut **tx)
    .await?;

    if result.rows_affected() == 0 {
        return Err(StoreError::not_found("position", position.id.to_string()));
    }

    Ok(())
}

/// Append an event to the log within the caller's transaction.
///
/// Returns the assigned monotonic event ID. Append alongside the row update
/// that the event describes; either both commit or neither does.
pub async fn append_event(
    tx: &mut Transaction<'_, Sqlite>,
    payload: &EventPayload,
) -> Result<i64, StoreError> {
    let position_id = payload.snapshot().id;
    let json = serde_json::to_string(payload)?;

    let result = sqlx::query(
        "INSERT INTO position_events (position_id, event_type, payload, created_at) \
         VALUES (?1, ?2, ?3, ?4)",
    )
    .bind(position_id.to_string())
    .bind(payload.kind().as_str())
    .bind(json)
    .bind(Utc::now())
    .execute(&mut **tx)
    .await?;

    let event_id = result.last_insert_rowid();

    debug!(
        event_id,
        position_id = %position_id,
        event_type = %payload.kind(),
        "Event appended"
    );

    Ok(event_id)
}

/// Persist a reconciliation run summary.
pub async fn insert_reconciliation(
    tx: &mut Transaction<'_, Sqlite>,
    record: &ReconciliationRecord,
) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO reconciliation_log (\
            run_id, started_at, completed_at, local_position_count, \
            exchange_position_count, discrepancies_found, discrepancies_resolved, status\
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
    )
    .bind(record.run_id.to_string())
    .bind(record.started_at)
    .bind(record.completed_at)
    .bind(record.local_position_count as i64)
    .bind(record.exchange_position_count as i64)
    .bind(record.discrepancies_found as i64)
    .bind(record.discrepancies_resolved as i64)
    .bind(record.status.as_str())
    .execute(&mut **tx)
    .await?;

    Ok(())
}

// =============================================================================
// Row mapping
// =============================================================================

fn uuid_col(row: &SqliteRow, column: &str) -> Result<Uuid, StoreError> {
    let text: String = row.try_get(column)?;
    Uuid::parse_str(&text)
        .map_err(|e| StoreError::Deserialization(format!("Invalid uuid in {}: {}", column, e)))
}

fn decimal_col(row: &SqliteRow, column: &str) -> Result<Decimal, StoreError> {
    let text: String = row.try_get(column)?;
    Decimal::from_str(&text)
        .map_err(|e| StoreError::Deserialization(format!("Invalid decimal in {}: {}", column, e)))
}

fn map_position_row(row: &SqliteRow) -> Result<Position, StoreError> {
    let symbol_text: String = row.try_get("symbol")?;
    let side_text: String = row.try_get("side")?;
    let status_text: String = row.try_get("status")?;

    let quantity = keeper_domain::Quantity::new(decimal_col(row, "quantity")?)
        .map_err(|e| StoreError::Deserialization(e.to_string()))?;
    let entry_price = keeper_domain::Price::new(decimal_col(row, "entry_price")?)
        .map_err(|e| StoreError::Deserialization(e.to_string()))?;
    let current_price = keeper_domain::Price::new(decimal_col(row, "current_price")?)
        .map_err(|e| StoreError::Deserialization(e.to_string()))?;

    Ok(Position {
        id: uuid_col(row, "position_id")?,
        owner_worker_id: uuid_col(row, "owner_worker_id")?,
        symbol: Symbol::from_pair(&symbol_text)
            .map_err(|e| StoreError::Deserialization(e.to_string()))?,
        side: Side::parse(&side_text).map_err(|e| StoreError::Deserialization(e.to_string()))?,
        status: PositionStatus::parse(&status_text)
            .map_err(|e| StoreError::Deserialization(e.to_string()))?,
        quantity,
        entry_price,
        current_price,
        realized_pnl: decimal_col(row, "realized_pnl")?,
        unrealized_pnl: decimal_col(row, "unrealized_pnl")?,
        opened_at: row.try_get::<DateTime<Utc>, _>("opened_at")?,
        closed_at: row.try_get::<Option<DateTime<Utc>>, _>("closed_at")?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
    })
}

fn map_event_row(row: &SqliteRow) -> Result<PositionEvent, StoreError> {
    let payload_json: String = row.try_get("payload")?;
    let payload: EventPayload = serde_json::from_str(&payload_json)?;

    Ok(PositionEvent {
        event_id: row.try_get("event_id")?,
        position_id: uuid_col(row, "position_id")?,
        payload,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
    })
}

fn map_reconciliation_row(row: &SqliteRow) -> Result<ReconciliationRecord, StoreError> {
    let status_text: String = row.try_get("status")?;

    Ok(ReconciliationRecord {
        run_id: uuid_col(row, "run_id")?,
        started_at: row.try_get::<DateTime<Utc>, _>("started_at")?,
        completed_at: row.try_get::<DateTime<Utc>, _>("completed_at")?,
        local_position_count: row.try_get::<i64, _>("local_position_count")? as u32,
        exchange_position_count: row.try_get::<i64, _>("exchange_position_count")? as u32,
        discrepancies_found: row.try_get::<i64, _>("discrepancies_found")? as u32,
        discrepancies_resolved: row.try_get::<i64, _>("discrepancies_resolved")? as u32,
        status: ReconciliationStatus::parse(&status_text)
            .map_err(|e| StoreError::Deserialization(e.to_string()))?,
    })
}

fn map_health_row(row: &SqliteRow) -> Result<HealthEntry, StoreError> {
    let result_text: String = row.try_get("result")?;

    Ok(HealthEntry {
        timestamp: row.try_get::<DateTime<Utc>, _>("timestamp")?,
        component: row.try_get("component")?,
        check_name: row.try_get("check_name")?,
        result: CheckResult::parse(&result_text)
            .map_err(|e| StoreError::Deserialization(e.to_string()))?,
        detail: row.try_get("detail")?,
    })
}

// =============================================================================
// Tests
// =============================================================================
