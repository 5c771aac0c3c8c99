//! Exclusive per-target lease.
//!
//! At most one sync may mutate a given target at a time. The lease is a
//! lock file under the state directory holding JSON metadata about the
//! current holder. An OS-level advisory lock guards against concurrent
//! processes on the same host; the TTL in the metadata lets a lease left
//! behind by a crashed holder be reclaimed once it expires.

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Duration, Utc};
use fs4::fs_std::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use tracing::{debug, warn};
use vaultsync_core::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LeaseInfo {
    holder: String,
    target: String,
    acquired_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl LeaseInfo {
    fn expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// Held for the duration of a sync against one target. Released
/// explicitly on completion, or best-effort on drop.
#[derive(Debug)]
pub struct TargetLease {
    path: Utf8PathBuf,
    file: Option<File>,
    target: String,
    released: bool,
}

impl TargetLease {
    /// Acquire the lease for `target`, failing with
    /// [`Error::OperationInProgress`] if another unexpired holder has it.
    pub fn acquire(
        state_dir: &Utf8Path,
        target: &str,
        holder: &str,
        ttl_seconds: u64,
    ) -> Result<Self> {
        let dir = state_dir.join("leases");
        fs::create_dir_all(dir.as_std_path())?;
        let path = dir.join(format!("{}.lease.json", target));

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.as_std_path())?;

        if !file.try_lock_exclusive()? {
            let info = Self::read_info(&mut file);
            let holder = info.map(|i| i.holder).unwrap_or_else(|| "unknown".to_string());
            return Err(Error::operation_in_progress(target, holder));
        }

        if let Some(info) = Self::read_info(&mut file) {
            if !info.expired() {
                // Lock file was free but the metadata is still live:
                // a holder elsewhere that we cannot see through the
                // advisory lock. Honor its lease until it expires.
                FileExt::unlock(&file)?;
                return Err(Error::operation_in_progress(target, info.holder));
            }
            warn!(
                "Reclaiming expired lease on '{}' held by '{}' since {}",
                target, info.holder, info.acquired_at
            );
        }

        let now = Utc::now();
        let info = LeaseInfo {
            holder: holder.to_string(),
            target: target.to_string(),
            acquired_at: now,
            expires_at: now + Duration::seconds(ttl_seconds as i64),
        };
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(serde_json::to_string_pretty(&info)?.as_bytes())?;
        file.sync_all()?;
        debug!("Acquired lease on '{}' for '{}'", target, holder);

        Ok(Self {
            path,
            file: Some(file),
            target: target.to_string(),
            released: false,
        })
    }

    fn read_info(file: &mut File) -> Option<LeaseInfo> {
        let mut contents = String::new();
        file.seek(SeekFrom::Start(0)).ok()?;
        file.read_to_string(&mut contents).ok()?;
        if contents.trim().is_empty() {
            return None;
        }
        serde_json::from_str(&contents).ok()
    }

    /// Release the lease and remove its metadata.
    pub fn release(mut self) -> Result<()> {
        self.release_inner()?;
        Ok(())
    }

    fn release_inner(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        if let Some(file) = self.file.take() {
            file.set_len(0)?;
            FileExt::unlock(&file)?;
        }
        if self.path.as_std_path().exists() {
            fs::remove_file(self.path.as_std_path())?;
        }
        debug!("Released lease on '{}'", self.target);
        Ok(())
    }
}

impl Drop for TargetLease {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = self.release_inner() {
                warn!("Failed to release lease on '{}': {}", self.target, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_dir() -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        (dir, path)
    }

    #[test]
    fn test_acquire_and_release() {
        let (_guard, dir) = state_dir();
        let lease = TargetLease::acquire(&dir, "local", "sync_a", 3600).unwrap();
        lease.release().unwrap();
        // Released lease can be re-acquired.
        let again = TargetLease::acquire(&dir, "local", "sync_b", 3600).unwrap();
        again.release().unwrap();
    }

    #[test]
    fn test_second_holder_rejected() {
        let (_guard, dir) = state_dir();
        let _lease = TargetLease::acquire(&dir, "local", "sync_a", 3600).unwrap();
        let err = TargetLease::acquire(&dir, "local", "sync_b", 3600).unwrap_err();
        assert!(matches!(err, Error::OperationInProgress { .. }));
        assert!(err.to_string().contains("sync_a"));
    }

    #[test]
    fn test_expired_lease_reclaimed() {
        let (_guard, dir) = state_dir();
        // TTL of zero expires immediately; the file lock is dropped with
        // the first lease, simulating a crashed holder.
        {
            let mut stale = TargetLease::acquire(&dir, "local", "sync_old", 0).unwrap();
            stale.released = true; // leave metadata behind
            stale.file = None;
        }
        let lease = TargetLease::acquire(&dir, "local", "sync_new", 3600).unwrap();
        lease.release().unwrap();
    }

    #[test]
    fn test_distinct_targets_independent() {
        let (_guard, dir) = state_dir();
        let _a = TargetLease::acquire(&dir, "local", "sync_a", 3600).unwrap();
        let b = TargetLease::acquire(&dir, "production", "sync_a", 3600).unwrap();
        b.release().unwrap();
    }

    #[test]
    fn test_drop_releases() {
        let (_guard, dir) = state_dir();
        {
            let _lease = TargetLease::acquire(&dir, "local", "sync_a", 3600).unwrap();
        }
        let lease = TargetLease::acquire(&dir, "local", "sync_b", 3600).unwrap();
        lease.release().unwrap();
    }
}
