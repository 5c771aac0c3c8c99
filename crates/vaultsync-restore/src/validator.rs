//! Backup validation by test restore.
//!
//! Proves an artifact is restorable by restoring it into a disposable
//! database on the same engine, comparing structure and row counts
//! against the live database, then discarding the disposable instance.
//! Teardown is unconditional: the ephemeral database is dropped on
//! every exit path, success or failure.

use crate::engine::{RestoreEngine, TableVerification};
use tracing::{info, warn};
use uuid::Uuid;
use vaultsync_backup::BackupArtifact;
use vaultsync_core::{ManagedTables, Result};
use vaultsync_driver::DatabaseDriver;

/// Result of a test restore, structured as three independent checks
/// so a report can say "17 of 22 tables found" rather than a single
/// boolean.
#[derive(Debug, Clone)]
pub struct TestReport {
    /// Name of the ephemeral database used
    pub ephemeral_database: String,

    /// Per-table existence in the restored instance
    pub existence: Vec<(String, bool)>,

    /// Per-table row counts: restored instance vs live database
    pub counts: Vec<TableVerification>,

    /// Whether the restore step itself succeeded
    pub restore_succeeded: bool,
}

impl TestReport {
    /// Number of expected tables present after the test restore.
    pub fn tables_found(&self) -> usize {
        self.existence.iter().filter(|(_, found)| *found).count()
    }

    pub fn tables_expected(&self) -> usize {
        self.existence.len()
    }

    /// "17 of 22 tables found"
    pub fn existence_summary(&self) -> String {
        format!(
            "{} of {} tables found",
            self.tables_found(),
            self.tables_expected()
        )
    }

    /// Overall pass: restore worked, every table exists, all counts
    /// match the live database.
    pub fn passed(&self) -> bool {
        self.restore_succeeded
            && self.tables_found() == self.tables_expected()
            && self.counts.iter().all(TableVerification::matched)
    }
}

/// Proves artifacts restorable via ephemeral test restores.
pub struct Validator {
    tables: ManagedTables,
}

impl Validator {
    pub fn new(tables: ManagedTables) -> Self {
        Self { tables }
    }

    /// Restore `artifact` into a disposable database on `live`'s
    /// engine and compare against the live database.
    pub async fn test_restore(
        &self,
        artifact: &BackupArtifact,
        live: &dyn DatabaseDriver,
    ) -> Result<TestReport> {
        let ephemeral_name = format!(
            "{}_verify_{}",
            live.endpoint().database,
            &Uuid::new_v4().simple().to_string()[..8]
        );

        info!(
            "Test-restoring {} into ephemeral database {}",
            artifact.id, ephemeral_name
        );

        live.create_database(&ephemeral_name).await?;
        let ephemeral = live.for_database(&ephemeral_name);

        // Run all checks, then tear down regardless of their outcome.
        let outcome = self
            .run_checks(artifact, live, ephemeral.as_ref(), &ephemeral_name)
            .await;

        if let Err(e) = live.drop_database(&ephemeral_name).await {
            warn!(
                "Failed to drop ephemeral database {}: {}",
                ephemeral_name, e
            );
        }

        outcome
    }

    async fn run_checks(
        &self,
        artifact: &BackupArtifact,
        live: &dyn DatabaseDriver,
        ephemeral: &dyn DatabaseDriver,
        ephemeral_name: &str,
    ) -> Result<TestReport> {
        let engine = RestoreEngine::new(self.tables.clone());

        let restore_succeeded = match engine.restore(artifact, ephemeral, true).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Test restore of {} failed: {}", artifact.id, e);
                false
            }
        };

        let mut existence = Vec::new();
        let mut counts = Vec::new();

        if restore_succeeded {
            for table in &artifact.tables {
                let found = ephemeral.table_exists(table).await?;
                existence.push((table.clone(), found));
                if found {
                    counts.push(TableVerification {
                        table: table.clone(),
                        expected: live.row_count(table).await?,
                        actual: ephemeral.row_count(table).await?,
                    });
                }
            }
        } else {
            existence = artifact.tables.iter().map(|t| (t.clone(), false)).collect();
        }

        Ok(TestReport {
            ephemeral_database: ephemeral_name.to_string(),
            existence,
            counts,
            restore_succeeded,
        })
    }
}
