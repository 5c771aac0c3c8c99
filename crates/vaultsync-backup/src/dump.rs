//! Dump engine: point-in-time export of the managed tables.
//!
//! Produces the raw SQL dump through the database driver, compresses
//! it, and records per-table row counts taken at dump time. Failed or
//! implausibly small exports never leave a half-written artifact
//! behind.

use crate::artifact::{BackupArtifact, ChecksumInfo, IntegrityStatus, MANIFEST_VERSION};
use crate::compression::{compress_file, DEFAULT_COMPRESSION_LEVEL};
use camino::{Utf8Path, Utf8PathBuf};
use chrono::Utc;
use std::collections::BTreeMap;
use tracing::{debug, info};
use uuid::Uuid;
use vaultsync_core::{Error, Result};
use vaultsync_driver::DatabaseDriver;

/// Produces compressed, checksummed exports.
pub struct DumpEngine {
    /// Size floor below which an export counts as failed
    min_artifact_bytes: u64,

    /// Gzip level (1-9)
    compression_level: u32,
}

impl DumpEngine {
    pub fn new(min_artifact_bytes: u64) -> Self {
        Self {
            min_artifact_bytes,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
        }
    }

    pub fn with_compression_level(mut self, level: u32) -> Self {
        self.compression_level = level.clamp(1, 9);
        self
    }

    /// Generate a timestamped artifact id for an origin label.
    pub fn artifact_id(origin: &str) -> String {
        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        let suffix = &Uuid::new_v4().simple().to_string()[..8];
        format!("backup_{}_{}_{}", origin, stamp, suffix)
    }

    /// Export the given tables from `driver` into `<dir>/<id>.sql.gz`.
    ///
    /// Fails with `DumpFailed` if the export process fails or the
    /// compressed artifact lands below the minimum-size floor; in both
    /// cases any partial output is deleted.
    pub async fn export(
        &self,
        driver: &dyn DatabaseDriver,
        tables: &[String],
        dir: &Utf8Path,
    ) -> Result<BackupArtifact> {
        let origin = driver.endpoint().label.clone();
        let id = Self::artifact_id(&origin);
        let artifact_path = dir.join(format!("{}.sql.gz", id));

        info!("Exporting {} tables from {} -> {}", tables.len(), origin, artifact_path);

        // Row counts taken alongside the dump; recorded in the
        // manifest as the restore-time expectation.
        let mut row_counts = BTreeMap::new();
        for table in tables {
            row_counts.insert(table.clone(), driver.row_count(table).await?);
        }

        let temp = tempfile::tempdir()?;
        let raw_path = Utf8PathBuf::from_path_buf(temp.path().join("dump.sql"))
            .map_err(|p| Error::driver(format!("non-UTF-8 temp path: {}", p.display())))?;

        if let Err(e) = driver.dump(tables, &raw_path).await {
            Self::discard(&artifact_path).await;
            return Err(e);
        }

        let uncompressed_bytes = tokio::fs::metadata(raw_path.as_std_path()).await?.len();

        let checksum = match compress_file(
            raw_path.as_std_path(),
            artifact_path.as_std_path(),
            Some(self.compression_level),
        ) {
            Ok(checksum) => checksum,
            Err(e) => {
                Self::discard(&artifact_path).await;
                return Err(e);
            }
        };

        let size_bytes = tokio::fs::metadata(artifact_path.as_std_path()).await?.len();
        if size_bytes < self.min_artifact_bytes {
            Self::discard(&artifact_path).await;
            return Err(Error::dump_failed(
                origin,
                format!(
                    "artifact is {} bytes, below the {}-byte plausibility floor",
                    size_bytes, self.min_artifact_bytes
                ),
            ));
        }

        debug!(
            "Export complete: {} bytes compressed ({} raw), sha256 {}",
            size_bytes, uncompressed_bytes, checksum
        );

        Ok(BackupArtifact {
            version: MANIFEST_VERSION.to_string(),
            id,
            path: artifact_path,
            size_bytes,
            uncompressed_bytes,
            integrity: IntegrityStatus::Unverified,
            tables: tables.to_vec(),
            row_counts,
            created_at: Utc::now(),
            origin,
            checksum: ChecksumInfo {
                algorithm: "sha256".to_string(),
                value: checksum,
            },
        })
    }

    async fn discard(path: &Utf8Path) {
        if tokio::fs::remove_file(path.as_std_path()).await.is_ok() {
            debug!("Removed partial artifact: {}", path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vaultsync_driver::MemoryDriver;

    fn backup_dir() -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        (dir, path)
    }

    #[tokio::test]
    async fn test_export_produces_artifact_with_counts() {
        let driver = MemoryDriver::with_label("local");
        driver.seed_rows("users", 10);
        driver.seed_rows("events", 25);
        let (_guard, dir) = backup_dir();

        let engine = DumpEngine::new(1);
        let artifact = engine
            .export(&driver, &["users".to_string(), "events".to_string()], &dir)
            .await
            .unwrap();

        assert!(artifact.path.as_std_path().exists());
        assert!(artifact.size_bytes > 0);
        assert_eq!(artifact.row_counts["users"], 10);
        assert_eq!(artifact.row_counts["events"], 25);
        assert_eq!(artifact.origin, "local");
        assert_eq!(artifact.integrity, IntegrityStatus::Unverified);
    }

    #[tokio::test]
    async fn test_export_failure_leaves_no_artifact() {
        let driver = MemoryDriver::with_label("local");
        driver.fail_dump(true);
        let (_guard, dir) = backup_dir();

        let engine = DumpEngine::new(1);
        let err = engine
            .export(&driver, &["users".to_string()], &dir)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::DumpFailed { .. }));
        let leftovers = std::fs::read_dir(dir.as_std_path()).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_export_below_size_floor_is_deleted() {
        let driver = MemoryDriver::with_label("local");
        driver.seed_rows("users", 1);
        let (_guard, dir) = backup_dir();

        // A tiny dump cannot reach a megabyte floor
        let engine = DumpEngine::new(1024 * 1024);
        let err = engine
            .export(&driver, &["users".to_string()], &dir)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::DumpFailed { .. }));
        let leftovers = std::fs::read_dir(dir.as_std_path()).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn test_artifact_ids_are_unique() {
        let a = DumpEngine::artifact_id("local");
        let b = DumpEngine::artifact_id("local");
        assert_ne!(a, b);
        assert!(a.starts_with("backup_local_"));
    }
}
