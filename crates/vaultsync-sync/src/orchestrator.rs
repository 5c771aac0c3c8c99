//! Eight-phase sync pipeline.
//!
//! A sync replaces the target's managed tables with the source's,
//! moving through fixed phases: validation, safety backup, approval,
//! preparation, truncate, data movement, finalization, verification.
//! Everything before the truncate fails closed and leaves the target
//! untouched; from preparation onward a failure or cancellation
//! triggers a single rollback pass to the safety backup. The sync
//! record is persisted after every phase change and every copy window,
//! so a crash never loses track of how far the pipeline got.

use crate::history::SyncHistory;
use crate::lease::TargetLease;
use crate::record::{SyncPhase, SyncRecord, SyncStatus};
use camino::Utf8PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use vaultsync_backup::{ArtifactStore, BackupArtifact};
use vaultsync_core::{Error, Result, TableSpec, VaultsyncConfig};
use vaultsync_driver::{ConnectivityProbe, DatabaseDriver};
use vaultsync_restore::RestoreEngine;
use vaultsync_safety::{ApprovalToken, AuditLog, GateState, OperationGuard, OperationKind, SafetyGate};

/// Cooperative cancellation handle, checked between phases and between
/// copy windows. Shareable with a signal handler.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What one sync run should do.
#[derive(Debug, Clone)]
pub struct SyncPlan {
    pub dry_run: bool,

    /// Approval for the destructive truncate-and-replace. Ignored for
    /// dry runs, which never reach the gate.
    pub token: ApprovalToken,

    /// Override of the configured copy window size.
    pub batch_size: Option<u64>,

    /// Skip the fresh safety backup. Honored only when every target
    /// table is already empty and a verified backup of the target
    /// exists; otherwise the sync fails closed.
    pub skip_safety_backup: bool,
}

impl SyncPlan {
    pub fn new(token: ApprovalToken) -> Self {
        Self {
            dry_run: false,
            token,
            batch_size: None,
            skip_safety_backup: false,
        }
    }

    pub fn dry_run() -> Self {
        Self {
            dry_run: true,
            token: ApprovalToken::default(),
            batch_size: None,
            skip_safety_backup: false,
        }
    }
}

enum PhaseOutcome {
    /// All phases ran; tables listed failed verification hard (a
    /// windowed or index-managed table holding fewer rows than the
    /// source).
    Finished { hard_failures: Vec<String> },
    Cancelled,
}

/// Drives one sync from a source driver into a target driver.
pub struct SyncOrchestrator<'a> {
    config: &'a VaultsyncConfig,
    source: &'a dyn DatabaseDriver,
    target: &'a dyn DatabaseDriver,
    store: &'a ArtifactStore,
    audit: &'a AuditLog,
    history: &'a SyncHistory,
    state_dir: Utf8PathBuf,
    cancel: CancelFlag,
}

impl<'a> SyncOrchestrator<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &'a VaultsyncConfig,
        source: &'a dyn DatabaseDriver,
        target: &'a dyn DatabaseDriver,
        store: &'a ArtifactStore,
        audit: &'a AuditLog,
        history: &'a SyncHistory,
        state_dir: Utf8PathBuf,
    ) -> Self {
        Self {
            config,
            source,
            target,
            store,
            audit,
            history,
            state_dir,
            cancel: CancelFlag::new(),
        }
    }

    /// Handle for cancelling this sync from another task.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Run the pipeline to a terminal record.
    ///
    /// Operational failures (unreachable endpoint, denied approval,
    /// failed copy) finalize the record and return it; only an
    /// unrecoverable state, where the rollback itself failed and the
    /// target is left inconsistent, is returned as an error.
    pub async fn run(&self, plan: &SyncPlan) -> Result<SyncRecord> {
        let direction = self.direction();
        let mut record = SyncRecord::new(
            direction,
            &self.source.endpoint().label,
            &self.target.endpoint().label,
            plan.dry_run,
        );
        info!(
            "Starting {}sync {} ({} -> {})",
            if plan.dry_run { "dry-run " } else { "" },
            record.id,
            record.source,
            record.target
        );
        self.history.save(&record)?;

        // Phase 1: both endpoints must answer before anything else.
        if let Err(e) = self.validate_connectivity().await {
            return self.finish(record, SyncStatus::Failed, Some(e.to_string()), None, None);
        }
        if self.cancel.is_cancelled() {
            return self.finish(record, SyncStatus::Cancelled, None, None, None);
        }

        if plan.dry_run {
            return self.simulate(record, plan).await;
        }

        let mut guard = OperationGuard::new();

        // Phase 2: a verified safety backup of the target, or no sync.
        record.set_phase(SyncPhase::Backup);
        self.history.save(&record)?;
        let safety_backup = match self.ensure_safety_backup(plan).await {
            Ok(artifact) => artifact,
            Err(e) => {
                return self.finish(record, SyncStatus::Failed, Some(e.to_string()), None, None)
            }
        };
        guard.advance(GateState::BackupVerified)?;
        let backup = Some(&safety_backup);
        if self.cancel.is_cancelled() {
            return self.finish(record, SyncStatus::Cancelled, None, backup, None);
        }

        // Phase 3: the truncate-and-replace is a registered destructive
        // pattern and needs explicit approval.
        record.set_phase(SyncPhase::Approval);
        self.history.save(&record)?;
        let gate = SafetyGate::new(self.store, self.audit);
        let operation = OperationKind::CascadeTruncate {
            table_count: self.config.tables.len(),
        };
        if let Err(e) = gate.require_approval(
            &operation,
            &record.target,
            &plan.token,
            Some(&safety_backup),
        ) {
            // A denial is a normal operator abort, not an incident.
            let status = match &e {
                Error::ApprovalDenied { .. } => SyncStatus::Cancelled,
                _ => SyncStatus::Failed,
            };
            return self.finish(record, status, Some(e.to_string()), backup, None);
        }
        guard.advance(GateState::Approved)?;
        if self.cancel.is_cancelled() {
            return self.finish(record, SyncStatus::Cancelled, None, backup, None);
        }

        // Phase 4 begins target mutation: serialize on the target and
        // arm the rollback path.
        record.set_phase(SyncPhase::Preparation);
        self.history.save(&record)?;
        let lease = match TargetLease::acquire(
            &self.state_dir,
            &record.target,
            &record.id,
            self.config.file.sync.lease_ttl_seconds,
        ) {
            Ok(lease) => lease,
            Err(e) => {
                return self.finish(record, SyncStatus::Failed, Some(e.to_string()), backup, None)
            }
        };
        guard.advance(GateState::Executing)?;

        let outcome = self.execute(plan, &mut record).await;
        let lease = Some(lease);

        match outcome {
            Ok(PhaseOutcome::Finished { hard_failures }) => {
                guard.advance(GateState::Committed)?;
                let (status, error) = settle(&record, &hard_failures);
                self.finish(record, status, error, backup, lease)
            }
            Ok(PhaseOutcome::Cancelled) => {
                if record.phase == SyncPhase::Verification {
                    // Data is fully in place; only the count checks were
                    // cut short.
                    record.add_warning("cancelled during verification; row counts unchecked");
                    guard.advance(GateState::Committed)?;
                    self.finish(record, SyncStatus::CompletedWithWarnings, None, backup, lease)
                } else {
                    self.rollback(record, SyncStatus::Cancelled, None, &safety_backup, guard, lease)
                        .await
                }
            }
            Err(e) => {
                self.rollback(
                    record,
                    SyncStatus::Failed,
                    Some(e.to_string()),
                    &safety_backup,
                    guard,
                    lease,
                )
                .await
            }
        }
    }

    fn direction(&self) -> vaultsync_core::Direction {
        let local = &self.config.file.endpoints.local;
        if self.source.endpoint().label == local.label {
            vaultsync_core::Direction::Push
        } else {
            vaultsync_core::Direction::Pull
        }
    }

    async fn validate_connectivity(&self) -> Result<()> {
        let probe = ConnectivityProbe::default();
        probe.check(self.source).await?;
        probe.check(self.target).await?;
        debug!("Both endpoints reachable");
        Ok(())
    }

    /// Phase 2. A skipped backup is only legal against an empty target
    /// that already has a verified artifact on the shelf.
    async fn ensure_safety_backup(&self, plan: &SyncPlan) -> Result<BackupArtifact> {
        let target_label = &self.target.endpoint().label;
        let max_age = self.config.file.backup.max_age_seconds;

        if plan.skip_safety_backup {
            for name in self.config.tables.names() {
                if self.target.table_exists(name).await? && self.target.row_count(name).await? > 0 {
                    return Err(Error::backup_unavailable(format!(
                        "backup skip refused: target table {} is not empty",
                        name
                    )));
                }
            }
            let artifact = self.store.latest(target_label, max_age)?.ok_or_else(|| {
                Error::backup_unavailable(
                    "backup skip refused: no verified backup of the target exists",
                )
            })?;
            info!(
                "Skipping fresh safety backup: target is empty, using {}",
                artifact.id
            );
            self.store.pin(&artifact.id)?;
            return Ok(artifact);
        }

        let table_names: Vec<String> =
            self.config.tables.names().iter().map(|s| s.to_string()).collect();
        let gate = SafetyGate::new(self.store, self.audit);
        gate.ensure_fresh_backup(self.target, &table_names, max_age)
            .await
    }

    /// Phases 4 through 8 against a live target.
    async fn execute(&self, plan: &SyncPlan, record: &mut SyncRecord) -> Result<PhaseOutcome> {
        let batch_size = plan.batch_size.unwrap_or(self.config.file.sync.batch_size);
        let specs = self.config.tables.in_restore_order();

        // Preparation: indexes come off before the bulk load.
        for spec in self.config.tables.indexed_tables() {
            for ddl in &spec.index_ddl {
                if let Some(name) = index_name_from_ddl(ddl) {
                    debug!("Dropping index {} on {}", name, spec.name);
                    self.target.drop_index(name).await?;
                }
            }
        }
        if self.cancel.is_cancelled() {
            return Ok(PhaseOutcome::Cancelled);
        }

        // Truncate: one cascading statement over the whole managed set,
        // so foreign keys between managed tables cannot interfere.
        record.set_phase(SyncPhase::Truncate);
        self.history.save(record)?;
        let table_list = self
            .config
            .tables
            .names()
            .join(", ");
        self.target
            .execute(&format!("TRUNCATE TABLE {} CASCADE", table_list))
            .await?;
        info!("Truncated {} tables on {}", specs.len(), record.target);
        if self.cancel.is_cancelled() {
            return Ok(PhaseOutcome::Cancelled);
        }

        // Data movement, in dependency order.
        record.set_phase(SyncPhase::DataMovement);
        self.history.save(record)?;
        for spec in specs {
            let total = self.source.row_count(&spec.name).await?;
            record.begin_table(&spec.name, total);
            self.history.save(record)?;
            info!("Copying {} ({} rows)", spec.name, total);

            if spec.large {
                self.copy_windowed(record, spec, total, batch_size).await?;
            } else if total > 0 {
                let rows = self
                    .source
                    .fetch_window(&spec.name, &spec.order_column, 0, total)
                    .await?;
                let written = self.target.append_rows(&spec.name, &rows).await?;
                record.add_window(&spec.name, written);
                self.history.save(record)?;
            }
            if self.cancel.is_cancelled() {
                return Ok(PhaseOutcome::Cancelled);
            }
        }

        // Finalization: indexes go back on, unless the table stayed
        // trivially small.
        record.set_phase(SyncPhase::Finalization);
        self.history.save(record)?;
        for spec in self.config.tables.indexed_tables() {
            let count = self.target.row_count(&spec.name).await?;
            if count < self.config.file.sync.index_rebuild_min_rows {
                debug!(
                    "Skipping index rebuild on {} ({} rows below threshold)",
                    spec.name, count
                );
                continue;
            }
            for ddl in &spec.index_ddl {
                debug!("Rebuilding index on {}", spec.name);
                self.target.create_index(ddl).await?;
            }
        }
        if self.cancel.is_cancelled() {
            return Ok(PhaseOutcome::Cancelled);
        }

        // Verification: advisory for ordinary drift, hard for a
        // windowed or index-managed table holding less than the source.
        record.set_phase(SyncPhase::Verification);
        self.history.save(record)?;
        let mut hard_failures = Vec::new();
        for spec in specs {
            if self.cancel.is_cancelled() {
                return Ok(PhaseOutcome::Cancelled);
            }
            let expected = self.source.row_count(&spec.name).await?;
            let actual = self.target.row_count(&spec.name).await?;
            let verified = expected == actual;
            record.mark_verified(&spec.name, verified);
            if !verified {
                let note = format!(
                    "row count mismatch on {}: source {}, target {}",
                    spec.name, expected, actual
                );
                warn!("{}", note);
                record.add_warning(note);
                if (spec.large || spec.indexed) && actual < expected {
                    hard_failures.push(spec.name.clone());
                }
            }
            self.history.save(record)?;
        }

        Ok(PhaseOutcome::Finished { hard_failures })
    }

    async fn copy_windowed(
        &self,
        record: &mut SyncRecord,
        spec: &TableSpec,
        total: u64,
        batch_size: u64,
    ) -> Result<()> {
        let mut offset = 0u64;
        while offset < total {
            if self.cancel.is_cancelled() {
                return Ok(());
            }
            let rows = self
                .source
                .fetch_window(&spec.name, &spec.order_column, offset, batch_size)
                .await?;
            if rows.is_empty() {
                break;
            }
            let fetched = rows.len() as u64;
            let written = self.target.append_rows(&spec.name, &rows).await?;
            record.add_window(&spec.name, written);
            self.history.save(record)?;
            debug!(
                "{}: window at offset {} copied {} rows",
                spec.name, offset, written
            );
            offset += fetched;
        }
        Ok(())
    }

    /// A dry run walks the same phases but mutates nothing: no backup,
    /// no approval, no lease, no writes. Every skipped mutation is
    /// recorded as a planned action.
    async fn simulate(&self, mut record: SyncRecord, plan: &SyncPlan) -> Result<SyncRecord> {
        let batch_size = plan.batch_size.unwrap_or(self.config.file.sync.batch_size);

        record.set_phase(SyncPhase::Backup);
        record.add_planned_action(format!(
            "create or reuse a verified safety backup of {}",
            record.target
        ));

        record.set_phase(SyncPhase::Approval);
        let operation = OperationKind::CascadeTruncate {
            table_count: self.config.tables.len(),
        };
        record.add_planned_action(format!(
            "require approval for {} against {}",
            operation.describe(),
            record.target
        ));

        record.set_phase(SyncPhase::Preparation);
        for spec in self.config.tables.indexed_tables() {
            for ddl in &spec.index_ddl {
                if let Some(name) = index_name_from_ddl(ddl) {
                    record.add_planned_action(format!("drop index {} on {}", name, spec.name));
                }
            }
        }

        record.set_phase(SyncPhase::Truncate);
        record.add_planned_action(format!(
            "TRUNCATE TABLE {} CASCADE",
            self.config.tables.names().join(", ")
        ));

        record.set_phase(SyncPhase::DataMovement);
        for spec in self.config.tables.in_restore_order() {
            let total = self.source.row_count(&spec.name).await?;
            record.begin_table(&spec.name, total);
            if spec.large {
                let windows = total.div_ceil(batch_size.max(1));
                record.add_planned_action(format!(
                    "copy {} rows into {} in {} windows",
                    total, spec.name, windows
                ));
            } else {
                record.add_planned_action(format!("copy {} rows into {}", total, spec.name));
            }
        }

        record.set_phase(SyncPhase::Finalization);
        for spec in self.config.tables.indexed_tables() {
            record.add_planned_action(format!("rebuild {} indexes on {}", spec.index_ddl.len(), spec.name));
        }

        record.set_phase(SyncPhase::Verification);
        record.add_planned_action("verify per-table row counts against the source".to_string());

        record.finalize(SyncStatus::Completed, None);
        self.history.save(&record)?;
        info!(
            "Dry run {} complete: {} planned actions",
            record.id,
            record.planned_actions.len()
        );
        Ok(record)
    }

    /// One rollback pass to the safety backup, then finalize. If the
    /// rollback itself fails, the target is in an unknown state: the
    /// record is finalized as failed and the unrecoverable error, which
    /// names the safety backup's location, propagates to the caller.
    async fn rollback(
        &self,
        mut record: SyncRecord,
        status: SyncStatus,
        error: Option<String>,
        safety_backup: &BackupArtifact,
        mut guard: OperationGuard,
        lease: Option<TargetLease>,
    ) -> Result<SyncRecord> {
        warn!(
            "Sync {} aborted in phase {:?}; rolling back {} to {}",
            record.id, record.phase, record.target, safety_backup.id
        );
        let engine = RestoreEngine::new(self.config.tables.clone());
        match engine
            .rollback_to_safety_backup(safety_backup, self.target)
            .await
        {
            Ok(()) => {
                guard.advance(GateState::RolledBack)?;
                record.add_warning(format!("target rolled back to {}", safety_backup.id));
                self.finish(record, status, error, Some(safety_backup), lease)
            }
            Err(rollback_err) => {
                record.finalize(SyncStatus::Failed, Some(rollback_err.to_string()));
                self.history.save(&record)?;
                if let Err(e) = self.store.unpin(&safety_backup.id) {
                    warn!("Leaving {} pinned: {}", safety_backup.id, e);
                }
                if let Some(lease) = lease {
                    lease.release()?;
                }
                Err(rollback_err)
            }
        }
    }

    /// Finalize, persist, and release everything the run held.
    fn finish(
        &self,
        mut record: SyncRecord,
        status: SyncStatus,
        error: Option<String>,
        safety_backup: Option<&BackupArtifact>,
        lease: Option<TargetLease>,
    ) -> Result<SyncRecord> {
        record.finalize(status, error);
        self.history.save(&record)?;
        if let Some(artifact) = safety_backup {
            self.store.unpin(&artifact.id)?;
        }
        if let Some(lease) = lease {
            lease.release()?;
        }
        info!(
            "Sync {} finished: {:?} after {}s",
            record.id,
            record.status,
            record.duration_seconds()
        );
        Ok(record)
    }
}

/// Terminal status from the verification results. A hard failure means
/// data the pipeline wrote is missing from the target; any other
/// mismatch is drift worth a warning but not an error.
fn settle(record: &SyncRecord, hard_failures: &[String]) -> (SyncStatus, Option<String>) {
    if !hard_failures.is_empty() {
        return (
            SyncStatus::CompletedWithErrors,
            Some(format!(
                "verification failed on: {}",
                hard_failures.join(", ")
            )),
        );
    }
    let drift = record
        .tables
        .values()
        .any(|progress| progress.verified == Some(false));
    if drift || !record.warnings.is_empty() {
        (SyncStatus::CompletedWithWarnings, None)
    } else {
        (SyncStatus::Completed, None)
    }
}

/// Pull the index name out of its CREATE INDEX statement.
fn index_name_from_ddl(ddl: &str) -> Option<&str> {
    let mut tokens = ddl.split_whitespace().peekable();
    while let Some(token) = tokens.next() {
        if token.eq_ignore_ascii_case("index") {
            while let Some(next) = tokens.peek() {
                if next.eq_ignore_ascii_case("concurrently")
                    || next.eq_ignore_ascii_case("if")
                    || next.eq_ignore_ascii_case("not")
                    || next.eq_ignore_ascii_case("exists")
                {
                    tokens.next();
                } else {
                    break;
                }
            }
            return tokens.next();
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_name_extraction() {
        assert_eq!(
            index_name_from_ddl("CREATE INDEX idx_events_ts ON events (ts)"),
            Some("idx_events_ts")
        );
        assert_eq!(
            index_name_from_ddl("CREATE UNIQUE INDEX IF NOT EXISTS uq_users_email ON users (email)"),
            Some("uq_users_email")
        );
        assert_eq!(index_name_from_ddl("ANALYZE events"), None);
    }

    #[test]
    fn test_cancel_flag_shared() {
        let flag = CancelFlag::new();
        let clone = flag.clone();
        assert!(!clone.is_cancelled());
        flag.cancel();
        assert!(clone.is_cancelled());
    }
}
