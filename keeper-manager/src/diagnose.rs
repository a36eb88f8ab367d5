//! Self-diagnosis: invariant checks over the stored state.
//!
//! Each check produces a PASS/FAIL health entry, persisted to the health
//! log for monitoring collaborators. Checks repair what they safely can
//! (the event log is the source of truth); anomalies that cannot be
//! auto-fixed are logged as FAIL for operator follow-up, never dropped.

use tracing::{info, warn};

use keeper_domain::{CheckResult, HealthEntry};
use keeper_store as store;

use crate::error::{ManagerError, ManagerResult};
use crate::manager::{touch, PositionManager};

const COMPONENT: &str = "position_manager";

impl PositionManager {
    /// Run all invariant checks, repairing where safe.
    ///
    /// Returns the health entries written this run.
    pub async fn self_diagnose(&self) -> ManagerResult<Vec<HealthEntry>> {
        let mut entries = Vec::new();

        self.check_held_quantities(&mut entries).await?;
        self.check_orphaned_events(&mut entries).await?;
        self.check_duplicate_keys(&mut entries).await?;
        self.check_closed_timestamps(&mut entries).await?;
        self.check_rows_match_replay(&mut entries).await?;

        for entry in &entries {
            self.store().record_health(entry).await?;
            if entry.result == CheckResult::Fail {
                warn!(
                    check = %entry.check_name,
                    detail = %entry.detail,
                    "Health check failed"
                );
            }
        }

        info!(
            checks = entries.len(),
            failures = entries.iter().filter(|e| e.result == CheckResult::Fail).count(),
            "Self-diagnosis complete"
        );

        Ok(entries)
    }

    /// No held position may carry a non-positive quantity. Such a row is
    /// unrepresentable in the domain model and implies corruption outside
    /// this process, so it is reported rather than repaired.
    async fn check_held_quantities(&self, entries: &mut Vec<HealthEntry>) -> ManagerResult<()> {
        let bad_rows = self.store().nonpositive_held_rows().await?;

        if bad_rows.is_empty() {
            entries.push(HealthEntry::pass(
                COMPONENT,
                "held_quantity_positive",
                "all held positions have positive quantity",
            ));
        } else {
            for (position_id, quantity) in bad_rows {
                entries.push(HealthEntry::fail(
                    COMPONENT,
                    "held_quantity_positive",
                    format!("position {} holds non-positive quantity {}", position_id, quantity),
                ));
            }
        }

        Ok(())
    }

    /// Every event must reference an existing position row. The event log
    /// is immutable, so orphans are reported, never deleted.
    async fn check_orphaned_events(&self, entries: &mut Vec<HealthEntry>) -> ManagerResult<()> {
        let orphans = self.store().orphaned_events().await?;

        if orphans.is_empty() {
            entries.push(HealthEntry::pass(
                COMPONENT,
                "events_reference_positions",
                "every event references an existing position",
            ));
        } else {
            for (event_id, position_id) in orphans {
                entries.push(HealthEntry::fail(
                    COMPONENT,
                    "events_reference_positions",
                    format!("event {} references missing position {}", event_id, position_id),
                ));
            }
        }

        Ok(())
    }

    /// Reconciliation matches by symbol+side; two held rows with the same
    /// key make that matching ambiguous. Which row is real cannot be decided
    /// locally, so duplicates are reported for operator follow-up.
    async fn check_duplicate_keys(&self, entries: &mut Vec<HealthEntry>) -> ManagerResult<()> {
        let duplicates = self.store().duplicate_held_keys().await?;

        if duplicates.is_empty() {
            entries.push(HealthEntry::pass(
                COMPONENT,
                "held_keys_unique",
                "no symbol+side held by more than one position",
            ));
        } else {
            for (symbol, side, count) in duplicates {
                entries.push(HealthEntry::fail(
                    COMPONENT,
                    "held_keys_unique",
                    format!("{} {} held by {} positions", symbol, side, count),
                ));
            }
        }

        Ok(())
    }

    /// A closed position must carry its close timestamp. Repairable: the
    /// row's last update time is the best available estimate.
    async fn check_closed_timestamps(&self, entries: &mut Vec<HealthEntry>) -> ManagerResult<()> {
        let missing = self.store().closed_without_timestamp().await?;

        if missing.is_empty() {
            entries.push(HealthEntry::pass(
                COMPONENT,
                "closed_have_timestamp",
                "all closed positions carry closed_at",
            ));
            return Ok(());
        }

        let mut repaired = 0;
        for position_id in &missing {
            if let Some(mut position) = self.store().get_position(*position_id).await? {
                position.closed_at = Some(position.updated_at);
                touch(&mut position);

                let mut tx = self.store().begin().await?;
                store::update_position(&mut tx, &position).await?;
                tx.commit().await.map_err(|e| {
                    ManagerError::Storage(store::StoreError::Transaction(e.to_string()))
                })?;
                repaired += 1;
            }
        }

        entries.push(HealthEntry::pass(
            COMPONENT,
            "closed_have_timestamp",
            format!("repaired {} closed positions missing closed_at", repaired),
        ));

        Ok(())
    }

    /// The stored row of every held position must equal the state replayed
    /// from its event stream. On mismatch the event log wins and the row is
    /// rewritten from the latest snapshot.
    async fn check_rows_match_replay(&self, entries: &mut Vec<HealthEntry>) -> ManagerResult<()> {
        let held = self.store().held_positions().await?;
        let mut repaired = 0;

        for position in held {
            match self.replay_position(position.id).await? {
                None => {
                    entries.push(HealthEntry::fail(
                        COMPONENT,
                        "rows_match_replay",
                        format!("held position {} has no events to replay", position.id),
                    ));
                }
                Some(replayed) if replayed != position => {
                    let mut tx = self.store().begin().await?;
                    store::update_position(&mut tx, &replayed).await?;
                    tx.commit().await.map_err(|e| {
                        ManagerError::Storage(store::StoreError::Transaction(e.to_string()))
                    })?;
                    repaired += 1;

                    warn!(
                        position_id = %position.id,
                        "Row diverged from event log; rewritten from latest snapshot"
                    );
                }
                Some(_) => {}
            }
        }

        entries.push(HealthEntry::pass(
            COMPONENT,
            "rows_match_replay",
            if repaired == 0 {
                "all held rows match their event history".to_string()
            } else {
                format!("rewrote {} rows from the event log", repaired)
            },
        ));

        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
