//! Persistent sync history.
//!
//! Each record is one JSON file under the state directory, rewritten
//! atomically on every phase or progress change. The history outlives
//! the process that ran the sync: a crash mid-sync leaves a record in
//! `running` state at its last persisted phase, inspectable later.

use crate::record::SyncRecord;
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;
use tracing::warn;
use vaultsync_core::Result;

/// Store of sync records, queryable by id and recency.
pub struct SyncHistory {
    directory: Utf8PathBuf,
}

impl SyncHistory {
    pub fn new(directory: Utf8PathBuf) -> Result<Self> {
        fs::create_dir_all(directory.as_std_path())?;
        Ok(Self { directory })
    }

    /// History at `<state_dir>/syncs`.
    pub fn in_state_dir(state_dir: &Utf8Path) -> Result<Self> {
        Self::new(state_dir.join("syncs"))
    }

    fn record_path(&self, id: &str) -> Utf8PathBuf {
        self.directory.join(format!("{}.json", id))
    }

    /// Persist a record. Write-then-rename so a crash mid-write never
    /// corrupts the previous persisted state.
    pub fn save(&self, record: &SyncRecord) -> Result<()> {
        let path = self.record_path(&record.id);
        let tmp = self.directory.join(format!(".{}.tmp", record.id));
        fs::write(tmp.as_std_path(), serde_json::to_string_pretty(record)?)?;
        fs::rename(tmp.as_std_path(), path.as_std_path())?;
        Ok(())
    }

    /// Look up one record by id.
    pub fn get(&self, id: &str) -> Result<Option<SyncRecord>> {
        let path = self.record_path(id);
        if !path.as_std_path().exists() {
            return Ok(None);
        }
        let json = fs::read_to_string(path.as_std_path())?;
        Ok(Some(serde_json::from_str(&json)?))
    }

    /// The most recent `limit` records, newest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<SyncRecord>> {
        let mut records = Vec::new();
        for entry in fs::read_dir(self.directory.as_std_path())? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.ends_with(".json") {
                continue;
            }
            let json = match fs::read_to_string(entry.path()) {
                Ok(json) => json,
                Err(e) => {
                    warn!("Skipping unreadable sync record {}: {}", name, e);
                    continue;
                }
            };
            match serde_json::from_str::<SyncRecord>(&json) {
                Ok(record) => records.push(record),
                Err(e) => warn!("Skipping malformed sync record {}: {}", name, e),
            }
        }
        records.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        records.truncate(limit);
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{SyncPhase, SyncStatus};
    use vaultsync_core::Direction;

    fn history() -> (tempfile::TempDir, SyncHistory) {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        (dir, SyncHistory::new(path.join("syncs")).unwrap())
    }

    #[test]
    fn test_save_and_get_by_id() {
        let (_guard, history) = history();
        let mut record = SyncRecord::new(Direction::Pull, "production", "local", false);
        record.set_phase(SyncPhase::DataMovement);
        history.save(&record).unwrap();

        let loaded = history.get(&record.id).unwrap().unwrap();
        assert_eq!(loaded.phase, SyncPhase::DataMovement);
        assert_eq!(loaded.status, SyncStatus::Running);
    }

    #[test]
    fn test_missing_record_is_none() {
        let (_guard, history) = history();
        assert!(history.get("sync_nope").unwrap().is_none());
    }

    #[test]
    fn test_recent_orders_newest_first() {
        let (_guard, history) = history();
        let mut ids = Vec::new();
        for _ in 0..3 {
            let record = SyncRecord::new(Direction::Push, "local", "production", false);
            history.save(&record).unwrap();
            ids.push(record.id.clone());
            std::thread::sleep(std::time::Duration::from_millis(5));
        }

        let recent = history.recent(2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].id, ids[2]);
        assert_eq!(recent[1].id, ids[1]);
    }

    #[test]
    fn test_resave_overwrites_in_place() {
        let (_guard, history) = history();
        let mut record = SyncRecord::new(Direction::Pull, "production", "local", false);
        history.save(&record).unwrap();

        record.finalize(SyncStatus::Failed, Some("interrupted".to_string()));
        history.save(&record).unwrap();

        let loaded = history.get(&record.id).unwrap().unwrap();
        assert_eq!(loaded.status, SyncStatus::Failed);
        assert_eq!(history.recent(10).unwrap().len(), 1);
    }
}
