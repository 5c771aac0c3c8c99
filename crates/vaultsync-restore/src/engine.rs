//! Restore engine: apply a backup artifact to a target endpoint.
//!
//! Restores are idempotent and re-runnable: table drops use if-exists
//! semantics, and re-applying the same artifact converges on the same
//! state. A failure during apply aborts the restore; remaining tables
//! are not attempted.

use camino::Utf8PathBuf;
use flate2::read::GzDecoder;
use std::fs::File;
use std::io;
use tracing::{debug, info, warn};
use vaultsync_backup::BackupArtifact;
use vaultsync_core::{Error, ManagedTables, Result};
use vaultsync_driver::DatabaseDriver;

/// Minimum plausible artifact size checked during validation.
const MIN_PLAUSIBLE_BYTES: u64 = 16;

/// Outcome of pre-restore validation. Collects every failure rather
/// than stopping at the first, so the caller can report all problems
/// at once.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub failures: Vec<String>,
}

impl ValidationResult {
    pub fn passed(&self) -> bool {
        self.failures.is_empty()
    }

    fn fail(&mut self, reason: impl Into<String>) {
        self.failures.push(reason.into());
    }
}

/// Per-table row-count comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableVerification {
    pub table: String,
    pub expected: u64,
    pub actual: u64,
}

impl TableVerification {
    pub fn matched(&self) -> bool {
        self.expected == self.actual
    }
}

/// Result of post-restore row-count verification.
#[derive(Debug, Clone, Default)]
pub struct VerificationReport {
    pub entries: Vec<TableVerification>,
}

impl VerificationReport {
    pub fn all_matched(&self) -> bool {
        self.entries.iter().all(TableVerification::matched)
    }

    pub fn mismatches(&self) -> impl Iterator<Item = &TableVerification> {
        self.entries.iter().filter(|e| !e.matched())
    }
}

/// Applies backup artifacts to a target endpoint.
pub struct RestoreEngine {
    tables: ManagedTables,
}

impl RestoreEngine {
    pub fn new(tables: ManagedTables) -> Self {
        Self { tables }
    }

    /// Check an artifact is restorable without touching any endpoint.
    pub fn validate(&self, artifact: &BackupArtifact) -> ValidationResult {
        let mut result = ValidationResult::default();
        let path = artifact.path.as_std_path();

        match std::fs::metadata(path) {
            Ok(meta) => {
                if meta.len() < MIN_PLAUSIBLE_BYTES {
                    result.fail(format!(
                        "artifact is {} bytes, below the {}-byte minimum",
                        meta.len(),
                        MIN_PLAUSIBLE_BYTES
                    ));
                } else if let Err(e) = vaultsync_backup::gzip_readable(path) {
                    result.fail(format!("artifact is not readable as gzip: {}", e));
                }
            }
            Err(e) => result.fail(format!("artifact file missing or unreadable: {}", e)),
        }

        if artifact.tables.is_empty() {
            result.fail("artifact table manifest is empty".to_string());
        }

        result
    }

    /// Restore `artifact` into `target`.
    ///
    /// With `drop_existing`, existing table definitions are removed
    /// first (reverse dependency order, if-exists semantics) so the
    /// restore succeeds identically whether the tables exist or not.
    pub async fn restore(
        &self,
        artifact: &BackupArtifact,
        target: &dyn DatabaseDriver,
        drop_existing: bool,
    ) -> Result<()> {
        let validation = self.validate(artifact);
        if !validation.passed() {
            return Err(Error::restore_failed(
                artifact.tables.first().cloned().unwrap_or_default(),
                format!("artifact failed validation: {}", validation.failures.join("; ")),
            ));
        }

        info!(
            "Restoring {} ({} tables) into {}",
            artifact.id,
            artifact.tables.len(),
            target.endpoint().label
        );

        let dump = self.decompress(artifact)?;

        if drop_existing {
            // Dependents drop before their referenced tables.
            for spec in self.tables.in_restore_order().iter().rev() {
                if !artifact.tables.contains(&spec.name) {
                    continue;
                }
                debug!("Dropping table if exists: {}", spec.name);
                target
                    .execute(&format!("DROP TABLE IF EXISTS {}", spec.name))
                    .await
                    .map_err(|e| Error::restore_failed(spec.name.clone(), e.to_string()))?;
            }
        }

        target.restore(&dump.path).await.map_err(|e| {
            Error::restore_failed(
                artifact.tables.first().cloned().unwrap_or_default(),
                e.to_string(),
            )
        })?;

        // Attribute any load failure to the first table the apply did
        // not materialize, in dependency order; abort there.
        for spec in self.tables.in_restore_order() {
            if !artifact.tables.contains(&spec.name) {
                continue;
            }
            if !target.table_exists(&spec.name).await? {
                return Err(Error::restore_failed(
                    spec.name.clone(),
                    "table missing after restore".to_string(),
                ));
            }
        }

        info!("Restore of {} complete", artifact.id);
        Ok(())
    }

    /// Compare each managed table's row count on `target` against the
    /// expectation recorded in the artifact manifest.
    pub async fn verify(
        &self,
        target: &dyn DatabaseDriver,
        artifact: &BackupArtifact,
    ) -> Result<VerificationReport> {
        let mut report = VerificationReport::default();
        for table in &artifact.tables {
            let expected = artifact.row_counts.get(table).copied().unwrap_or(0);
            let actual = target.row_count(table).await?;
            if expected != actual {
                warn!(
                    "Row count mismatch on {}: expected {}, found {}",
                    table, expected, actual
                );
            }
            report.entries.push(TableVerification {
                table: table.clone(),
                expected,
                actual,
            });
        }
        Ok(report)
    }

    /// Re-restore the safety backup after a failed destructive
    /// operation. If the rollback itself fails the operation becomes
    /// unrecoverable and the safety backup's location is surfaced
    /// verbatim; no further automated corrective action is attempted.
    pub async fn rollback_to_safety_backup(
        &self,
        safety_backup: &BackupArtifact,
        target: &dyn DatabaseDriver,
    ) -> Result<()> {
        warn!(
            "Rolling back {} to safety backup {}",
            target.endpoint().label,
            safety_backup.id
        );
        self.restore(safety_backup, target, true)
            .await
            .map_err(|e| Error::unrecoverable(e.to_string(), safety_backup.path.to_string()))
    }

    /// Decompress the artifact to a temporary SQL file.
    fn decompress(&self, artifact: &BackupArtifact) -> Result<DecompressedDump> {
        let dir = tempfile::tempdir()?;
        let path = Utf8PathBuf::from_path_buf(dir.path().join("restore.sql"))
            .map_err(|p| Error::driver(format!("non-UTF-8 temp path: {}", p.display())))?;

        let source = File::open(artifact.path.as_std_path())?;
        let mut decoder = GzDecoder::new(io::BufReader::new(source));
        let mut dest = File::create(path.as_std_path())?;
        io::copy(&mut decoder, &mut dest)?;

        Ok(DecompressedDump { _dir: dir, path })
    }
}

/// Keeps the tempdir alive while the decompressed dump is in use.
struct DecompressedDump {
    _dir: tempfile::TempDir,
    path: Utf8PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use vaultsync_backup::ArtifactStore;
    use vaultsync_core::TableSpec;
    use vaultsync_driver::MemoryDriver;

    fn tables() -> ManagedTables {
        ManagedTables::new(vec![
            TableSpec::new("users"),
            TableSpec::new("teams").depends_on("users"),
        ])
        .unwrap()
    }

    async fn artifact_for(
        driver: &MemoryDriver,
    ) -> (tempfile::TempDir, ArtifactStore, BackupArtifact) {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let store = ArtifactStore::new(path, 16).unwrap();
        let artifact = store
            .create(driver, &["users".to_string(), "teams".to_string()])
            .await
            .unwrap();
        (dir, store, artifact)
    }

    #[tokio::test]
    async fn test_restore_into_empty_target() {
        let source = MemoryDriver::with_label("local");
        source.seed_rows("users", 10);
        source.seed_rows("teams", 4);
        let (_guard, _store, artifact) = artifact_for(&source).await;

        let target = MemoryDriver::with_label("production");
        let engine = RestoreEngine::new(tables());
        engine.restore(&artifact, &target, true).await.unwrap();

        assert_eq!(target.row_count("users").await.unwrap(), 10);
        assert_eq!(target.row_count("teams").await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_restore_is_idempotent_over_existing_tables() {
        let source = MemoryDriver::with_label("local");
        source.seed_rows("users", 10);
        source.seed_rows("teams", 4);
        let (_guard, _store, artifact) = artifact_for(&source).await;

        let target = MemoryDriver::with_label("production");
        target.seed_rows("users", 99);

        let engine = RestoreEngine::new(tables());
        engine.restore(&artifact, &target, true).await.unwrap();
        engine.restore(&artifact, &target, true).await.unwrap();

        assert_eq!(target.row_count("users").await.unwrap(), 10);
        assert_eq!(target.row_count("teams").await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_restore_without_drop_leaves_existing_definitions() {
        let source = MemoryDriver::with_label("local");
        source.seed_rows("users", 10);
        source.seed_rows("teams", 4);
        let (_guard, _store, artifact) = artifact_for(&source).await;

        let target = MemoryDriver::with_label("production");
        target.seed_rows("users", 99);

        let engine = RestoreEngine::new(tables());
        engine.restore(&artifact, &target, false).await.unwrap();

        assert!(target
            .executed_sql()
            .iter()
            .all(|s| !s.starts_with("DROP TABLE")));
        assert_eq!(target.row_count("users").await.unwrap(), 10);
        assert_eq!(target.row_count("teams").await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_restore_drops_dependents_first() {
        let source = MemoryDriver::with_label("local");
        source.seed_rows("users", 1);
        source.seed_rows("teams", 1);
        let (_guard, _store, artifact) = artifact_for(&source).await;

        let target = MemoryDriver::with_label("production");
        let engine = RestoreEngine::new(tables());
        engine.restore(&artifact, &target, true).await.unwrap();

        let sql = target.executed_sql();
        let teams_drop = sql
            .iter()
            .position(|s| s == "DROP TABLE IF EXISTS teams")
            .unwrap();
        let users_drop = sql
            .iter()
            .position(|s| s == "DROP TABLE IF EXISTS users")
            .unwrap();
        assert!(teams_drop < users_drop);
    }

    #[tokio::test]
    async fn test_validate_zero_byte_artifact_collects_failures() {
        let source = MemoryDriver::with_label("local");
        source.seed_rows("users", 10);
        source.seed_rows("teams", 1);
        let (_guard, _store, artifact) = artifact_for(&source).await;

        std::fs::write(artifact.path.as_std_path(), b"").unwrap();

        let engine = RestoreEngine::new(tables());
        let result = engine.validate(&artifact);
        assert!(!result.passed());
        assert!(result.failures.iter().any(|f| f.contains("bytes")));
    }

    #[tokio::test]
    async fn test_restore_failure_names_table_and_cause() {
        let source = MemoryDriver::with_label("local");
        source.seed_rows("users", 10);
        source.seed_rows("teams", 1);
        let (_guard, _store, artifact) = artifact_for(&source).await;

        let target = MemoryDriver::with_label("production");
        target.fail_restore(true);

        let engine = RestoreEngine::new(tables());
        let err = engine.restore(&artifact, &target, true).await.unwrap_err();
        match err {
            Error::RestoreFailed { table, detail } => {
                assert_eq!(table, "users");
                assert!(detail.contains("injected"));
            }
            other => panic!("expected RestoreFailed, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_verify_reports_both_counts_per_table() {
        let source = MemoryDriver::with_label("local");
        source.seed_rows("users", 10);
        source.seed_rows("teams", 4);
        let (_guard, _store, artifact) = artifact_for(&source).await;

        let target = MemoryDriver::with_label("production");
        let engine = RestoreEngine::new(tables());
        engine.restore(&artifact, &target, true).await.unwrap();

        // Drift on the target after restore
        target.seed_rows("teams", 2);

        let report = engine.verify(&target, &artifact).await.unwrap();
        assert!(!report.all_matched());
        let mismatch = report.mismatches().next().unwrap();
        assert_eq!(mismatch.table, "teams");
        assert_eq!(mismatch.expected, 4);
        assert_eq!(mismatch.actual, 2);
    }

    #[tokio::test]
    async fn test_failed_rollback_is_unrecoverable_and_surfaces_path() {
        let source = MemoryDriver::with_label("local");
        source.seed_rows("users", 10);
        source.seed_rows("teams", 1);
        let (_guard, _store, artifact) = artifact_for(&source).await;

        let target = MemoryDriver::with_label("production");
        target.fail_restore(true);

        let engine = RestoreEngine::new(tables());
        let err = engine
            .rollback_to_safety_backup(&artifact, &target)
            .await
            .unwrap_err();
        match err {
            Error::Unrecoverable {
                safety_backup_path, ..
            } => assert_eq!(safety_backup_path, artifact.path.to_string()),
            other => panic!("expected Unrecoverable, got {other}"),
        }
    }
}
