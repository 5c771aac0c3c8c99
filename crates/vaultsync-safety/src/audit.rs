//! Append-only audit ledger for dangerous-operation decisions.
//!
//! One JSONL entry per decision, written under an exclusive file lock
//! and fsynced before the lock is released. Entries are never rewritten
//! or removed.

use crate::operation::DangerPattern;
use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use fs4::fs_std::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use tracing::warn;
use vaultsync_core::Result;

/// Default number of entries shown in tail mode
pub const DEFAULT_AUDIT_TAIL_LINES: usize = 25;

/// Outcome of one approval decision.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuditOutcome {
    Approved,
    Denied,
}

/// One dangerous-operation decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// When the decision was made
    pub timestamp: DateTime<Utc>,

    /// Human-readable operation description
    pub operation: String,

    /// The destructive pattern that matched
    pub pattern: DangerPattern,

    /// Target endpoint label
    pub target: String,

    /// Backup artifact in force at decision time, if any
    pub artifact_id: Option<String>,

    /// Whether approval was granted
    pub outcome: AuditOutcome,
}

/// Durable append-only record of gate decisions.
pub struct AuditLog {
    ledger_path: Utf8PathBuf,
}

impl AuditLog {
    pub fn new(ledger_path: Utf8PathBuf) -> Self {
        Self { ledger_path }
    }

    /// Ledger at `<state_dir>/audit.jsonl`.
    pub fn in_state_dir(state_dir: &Utf8Path) -> Result<Self> {
        fs::create_dir_all(state_dir.as_std_path())?;
        Ok(Self::new(state_dir.join("audit.jsonl")))
    }

    pub fn path(&self) -> &Utf8Path {
        &self.ledger_path
    }

    /// Append an entry (atomic, file-locked, durable).
    pub fn append(&self, entry: &AuditEntry) -> Result<()> {
        if let Some(parent) = self.ledger_path.parent() {
            fs::create_dir_all(parent.as_std_path())?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.ledger_path.as_std_path())?;

        // Exclusive lock, released on drop
        file.lock_exclusive()?;

        let json_line = serde_json::to_string(entry)?;
        writeln!(file, "{}", json_line)?;
        file.sync_all()?;

        Ok(())
    }

    /// All entries, oldest first. Malformed lines are skipped with a
    /// warning rather than poisoning the whole ledger.
    pub fn entries(&self) -> Result<Vec<AuditEntry>> {
        if !self.ledger_path.as_std_path().exists() {
            return Ok(Vec::new());
        }

        let file = fs::File::open(self.ledger_path.as_std_path())?;
        let reader = BufReader::new(file);
        let mut entries = Vec::new();

        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<AuditEntry>(&line) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!("Skipping malformed audit line {}: {}", idx + 1, e),
            }
        }

        Ok(entries)
    }

    /// The most recent `n` entries, oldest first.
    pub fn tail(&self, n: usize) -> Result<Vec<AuditEntry>> {
        let mut entries = self.entries()?;
        let skip = entries.len().saturating_sub(n);
        Ok(entries.split_off(skip))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log() -> (tempfile::TempDir, AuditLog) {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("audit.jsonl")).unwrap();
        (dir, AuditLog::new(path))
    }

    fn entry(outcome: AuditOutcome) -> AuditEntry {
        AuditEntry {
            timestamp: Utc::now(),
            operation: "cascade truncate of 3 tables".to_string(),
            pattern: DangerPattern::CascadeTruncate,
            target: "production".to_string(),
            artifact_id: Some("backup_production_20260830_101500_ab12cd34".to_string()),
            outcome,
        }
    }

    #[test]
    fn test_append_then_read_back() {
        let (_guard, log) = log();
        log.append(&entry(AuditOutcome::Approved)).unwrap();
        log.append(&entry(AuditOutcome::Denied)).unwrap();

        let entries = log.entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].outcome, AuditOutcome::Approved);
        assert_eq!(entries[1].outcome, AuditOutcome::Denied);
        assert!(entries[0].artifact_id.is_some());
    }

    #[test]
    fn test_tail_returns_most_recent() {
        let (_guard, log) = log();
        for _ in 0..5 {
            log.append(&entry(AuditOutcome::Approved)).unwrap();
        }
        log.append(&entry(AuditOutcome::Denied)).unwrap();

        let tail = log.tail(2).unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[1].outcome, AuditOutcome::Denied);
    }

    #[test]
    fn test_empty_ledger_reads_empty() {
        let (_guard, log) = log();
        assert!(log.entries().unwrap().is_empty());
    }

    #[test]
    fn test_malformed_line_is_skipped() {
        let (_guard, log) = log();
        log.append(&entry(AuditOutcome::Approved)).unwrap();
        {
            let mut file = OpenOptions::new()
                .append(true)
                .open(log.path().as_std_path())
                .unwrap();
            writeln!(file, "not json at all").unwrap();
        }
        log.append(&entry(AuditOutcome::Denied)).unwrap();

        assert_eq!(log.entries().unwrap().len(), 2);
    }

    #[test]
    fn test_entries_are_machine_parseable_jsonl() {
        let (_guard, log) = log();
        log.append(&entry(AuditOutcome::Approved)).unwrap();

        let raw = fs::read_to_string(log.path().as_std_path()).unwrap();
        let line = raw.lines().next().unwrap();
        let value: serde_json::Value = serde_json::from_str(line).unwrap();
        assert_eq!(value["pattern"], "cascade_truncate");
        assert_eq!(value["outcome"], "approved");
    }
}
