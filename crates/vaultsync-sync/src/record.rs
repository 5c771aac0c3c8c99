//! Sync records: the durable trace of one sync operation.
//!
//! A record is created at sync start, mutated as phases advance, and
//! finalized exactly once. Terminal records are immutable; mutation
//! attempts after finalization are ignored with a warning so a buggy
//! caller cannot rewrite history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;
use uuid::Uuid;
use vaultsync_core::Direction;

/// Phase of a sync, in execution order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Validation,
    Backup,
    Approval,
    Preparation,
    Truncate,
    DataMovement,
    Finalization,
    Verification,
    Completed,
}

impl SyncPhase {
    /// Phases at or past the point where the target has been mutated
    /// and a failed sync must attempt rollback.
    pub fn past_point_of_no_return(&self) -> bool {
        *self >= SyncPhase::Truncate && *self < SyncPhase::Completed
    }
}

/// Terminal and non-terminal sync states.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Running,
    Completed,
    /// All phases ran; some row counts drifted (legitimate source
    /// writes during a long sync can explain this)
    CompletedWithWarnings,
    /// All phases ran; a target under-count indicates load failure
    CompletedWithErrors,
    Failed,
    Cancelled,
}

impl SyncStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SyncStatus::Running)
    }
}

/// Progress of one table's data movement.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TableProgress {
    pub rows_total: u64,
    pub rows_done: u64,

    /// Row count of each copy window, in order
    pub windows: Vec<u64>,

    /// Set during verification: source and target counts agree
    pub verified: Option<bool>,
}

impl TableProgress {
    /// Percentage complete, 0-100.
    pub fn percent(&self) -> u8 {
        if self.rows_total == 0 {
            100
        } else {
            ((self.rows_done * 100) / self.rows_total).min(100) as u8
        }
    }
}

/// One in-flight or completed sync operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRecord {
    pub id: String,
    pub direction: Direction,
    pub source: String,
    pub target: String,
    pub dry_run: bool,
    pub status: SyncStatus,
    pub phase: SyncPhase,
    pub tables: BTreeMap<String, TableProgress>,

    /// Intended actions, populated instead of side effects on dry runs
    #[serde(default)]
    pub planned_actions: Vec<String>,

    #[serde(default)]
    pub warnings: Vec<String>,

    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl SyncRecord {
    pub fn new(direction: Direction, source: &str, target: &str, dry_run: bool) -> Self {
        Self {
            id: format!("sync_{}", Uuid::new_v4().simple()),
            direction,
            source: source.to_string(),
            target: target.to_string(),
            dry_run,
            status: SyncStatus::Running,
            phase: SyncPhase::Validation,
            tables: BTreeMap::new(),
            planned_actions: Vec::new(),
            warnings: Vec::new(),
            error: None,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    fn mutable(&self) -> bool {
        if self.status.is_terminal() {
            warn!("Ignoring mutation of terminal sync record {}", self.id);
            return false;
        }
        true
    }

    pub fn set_phase(&mut self, phase: SyncPhase) {
        if self.mutable() {
            self.phase = phase;
        }
    }

    /// Register a table at the start of its data movement.
    pub fn begin_table(&mut self, table: &str, rows_total: u64) {
        if self.mutable() {
            self.tables.insert(
                table.to_string(),
                TableProgress {
                    rows_total,
                    ..Default::default()
                },
            );
        }
    }

    /// Record one completed copy window.
    pub fn add_window(&mut self, table: &str, rows: u64) {
        if self.mutable() {
            let progress = self.tables.entry(table.to_string()).or_default();
            progress.rows_done += rows;
            progress.windows.push(rows);
        }
    }

    pub fn mark_verified(&mut self, table: &str, verified: bool) {
        if self.mutable() {
            self.tables.entry(table.to_string()).or_default().verified = Some(verified);
        }
    }

    pub fn add_warning(&mut self, warning: impl Into<String>) {
        if self.mutable() {
            self.warnings.push(warning.into());
        }
    }

    pub fn add_planned_action(&mut self, action: impl Into<String>) {
        if self.mutable() {
            self.planned_actions.push(action.into());
        }
    }

    /// Transition to a terminal status. Running -> terminal is the only
    /// legal transition; later calls are ignored.
    pub fn finalize(&mut self, status: SyncStatus, error: Option<String>) {
        if !self.mutable() {
            return;
        }
        debug_assert!(status.is_terminal());
        self.status = status;
        self.error = error;
        self.completed_at = Some(Utc::now());
        if status == SyncStatus::Completed || status == SyncStatus::CompletedWithWarnings {
            self.phase = SyncPhase::Completed;
        }
    }

    /// Wall-clock duration, up to now for running syncs.
    pub fn duration_seconds(&self) -> i64 {
        let end = self.completed_at.unwrap_or_else(Utc::now);
        (end - self.started_at).num_seconds()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> SyncRecord {
        SyncRecord::new(Direction::Pull, "production", "local", false)
    }

    #[test]
    fn test_new_record_is_running_in_validation() {
        let r = record();
        assert_eq!(r.status, SyncStatus::Running);
        assert_eq!(r.phase, SyncPhase::Validation);
        assert!(r.id.starts_with("sync_"));
    }

    #[test]
    fn test_windows_accumulate() {
        let mut r = record();
        r.begin_table("events", 25_000);
        r.add_window("events", 10_000);
        r.add_window("events", 10_000);
        r.add_window("events", 5_000);

        let p = &r.tables["events"];
        assert_eq!(p.windows, vec![10_000, 10_000, 5_000]);
        assert_eq!(p.rows_done, 25_000);
        assert_eq!(p.percent(), 100);
    }

    #[test]
    fn test_terminal_record_is_immutable() {
        let mut r = record();
        r.finalize(SyncStatus::Failed, Some("boom".to_string()));

        r.set_phase(SyncPhase::Verification);
        r.add_warning("late warning");
        r.finalize(SyncStatus::Completed, None);

        assert_eq!(r.status, SyncStatus::Failed);
        assert_eq!(r.error.as_deref(), Some("boom"));
        assert!(r.warnings.is_empty());
        assert_ne!(r.phase, SyncPhase::Verification);
    }

    #[test]
    fn test_point_of_no_return_boundaries() {
        assert!(!SyncPhase::Validation.past_point_of_no_return());
        assert!(!SyncPhase::Preparation.past_point_of_no_return());
        assert!(SyncPhase::Truncate.past_point_of_no_return());
        assert!(SyncPhase::DataMovement.past_point_of_no_return());
        assert!(SyncPhase::Verification.past_point_of_no_return());
        assert!(!SyncPhase::Completed.past_point_of_no_return());
    }

    #[test]
    fn test_serde_round_trip() {
        let mut r = record();
        r.begin_table("events", 10);
        r.add_window("events", 10);
        let json = serde_json::to_string(&r).unwrap();
        let parsed: SyncRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.id, r.id);
        assert_eq!(parsed.tables["events"].rows_done, 10);
    }

    #[test]
    fn test_percent_of_empty_table_is_complete() {
        let mut r = record();
        r.begin_table("empty", 0);
        assert_eq!(r.tables["empty"].percent(), 100);
    }
}
