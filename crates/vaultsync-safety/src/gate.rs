//! Safety gate: backup enforcement and two-stage approval.
//!
//! No destructive operation runs unless (a) a verified backup younger
//! than the freshness threshold exists, and (b) the operator supplied
//! explicit, non-bypassable confirmation. Both decisions are recorded
//! in the audit ledger regardless of outcome.

use crate::audit::{AuditEntry, AuditLog, AuditOutcome};
use crate::operation::{DangerPattern, OperationKind};
use chrono::{DateTime, Utc};
use std::fmt;
use tracing::{info, warn};
use vaultsync_backup::{ArtifactStore, BackupArtifact};
use vaultsync_core::{Error, Result};
use vaultsync_driver::DatabaseDriver;

/// Per-guarded-operation state machine. Transitions are strictly
/// ordered; anything else is a programming error surfaced as
/// `InvalidGateTransition`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Unchecked,
    BackupVerified,
    Approved,
    Executing,
    Committed,
    RolledBack,
}

impl GateState {
    fn may_advance_to(&self, next: GateState) -> bool {
        use GateState::*;
        matches!(
            (self, next),
            (Unchecked, BackupVerified)
                | (BackupVerified, Approved)
                | (Approved, Executing)
                | (Executing, Committed)
                | (Executing, RolledBack)
        )
    }
}

impl fmt::Display for GateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GateState::Unchecked => "unchecked",
            GateState::BackupVerified => "backup_verified",
            GateState::Approved => "approved",
            GateState::Executing => "executing",
            GateState::Committed => "committed",
            GateState::RolledBack => "rolled_back",
        };
        f.write_str(s)
    }
}

/// Tracks one guarded operation through the gate's state machine.
#[derive(Debug)]
pub struct OperationGuard {
    state: GateState,
}

impl Default for OperationGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl OperationGuard {
    pub fn new() -> Self {
        Self {
            state: GateState::Unchecked,
        }
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    /// True while the operation holds the exclusive right to mutate
    /// the target.
    pub fn is_executing(&self) -> bool {
        self.state == GateState::Executing
    }

    pub fn advance(&mut self, next: GateState) -> Result<()> {
        if !self.state.may_advance_to(next) {
            return Err(Error::InvalidGateTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        self.state = next;
        Ok(())
    }
}

/// Operator-supplied approval evidence.
///
/// The same token works whether it came from an interactive prompt or
/// from an automated caller that obtained approval out of band.
#[derive(Debug, Clone, Default)]
pub struct ApprovalToken {
    /// Stage one: semantic acknowledgment of what will be destroyed
    pub acknowledged_risk: bool,

    /// Stage two: the exact confirmation phrase
    pub confirmation_phrase: String,
}

/// Ephemeral record of a granted approval; the durable copy is the
/// audit entry.
#[derive(Debug, Clone)]
pub struct ApprovalDecision {
    pub pattern: DangerPattern,
    pub operation: String,
    pub target: String,
    pub artifact_id: Option<String>,
    pub approved_at: DateTime<Utc>,
}

/// Backup-enforcement and approval layer.
pub struct SafetyGate<'a> {
    store: &'a ArtifactStore,
    audit: &'a AuditLog,
}

impl<'a> SafetyGate<'a> {
    pub fn new(store: &'a ArtifactStore, audit: &'a AuditLog) -> Self {
        Self { store, audit }
    }

    /// Return a verified backup younger than `max_age_seconds` for the
    /// driver's endpoint, creating one if none qualifies. The returned
    /// artifact is pinned against retention; callers unpin it on any
    /// terminal outcome.
    ///
    /// Failure here is `BackupUnavailable`: fatal to the guarded
    /// operation and not retryable without operator intervention.
    pub async fn ensure_fresh_backup(
        &self,
        driver: &dyn DatabaseDriver,
        tables: &[String],
        max_age_seconds: u64,
    ) -> Result<BackupArtifact> {
        let origin = driver.endpoint().label.clone();

        if let Some(artifact) = self.store.latest(&origin, max_age_seconds)? {
            info!(
                "Using existing backup {} ({}s old)",
                artifact.id,
                artifact.age_seconds()
            );
            self.store.pin(&artifact.id)?;
            return Ok(artifact);
        }

        info!("No qualifying backup for {}; creating one", origin);
        match self.store.create(driver, tables).await {
            Ok(artifact) => {
                self.store.pin(&artifact.id)?;
                Ok(artifact)
            }
            Err(e) => {
                warn!("Backup creation failed for {}: {}", origin, e);
                Err(Error::backup_unavailable(format!(
                    "no fresh backup exists and creating one failed: {}",
                    e
                )))
            }
        }
    }

    /// Match an operation against the destructive-pattern registry.
    pub fn classify_dangerous(&self, operation: &OperationKind) -> Option<DangerPattern> {
        operation.classify()
    }

    /// Two-stage confirmation for a dangerous operation.
    ///
    /// Any non-matching input is a denial, not a retry prompt. The
    /// decision is appended to the audit ledger whether approved or
    /// denied.
    pub fn require_approval(
        &self,
        operation: &OperationKind,
        target: &str,
        token: &ApprovalToken,
        backup: Option<&BackupArtifact>,
    ) -> Result<ApprovalDecision> {
        let description = operation.describe();
        let pattern = match operation.classify() {
            Some(pattern) => pattern,
            None => {
                return Err(Error::approval_denied(
                    description,
                    "operation is not in the dangerous-pattern registry",
                ))
            }
        };

        let artifact_id = backup.map(|b| b.id.clone());
        let denial = |reason: &str| -> Result<ApprovalDecision> {
            self.record(&description, pattern, target, &artifact_id, AuditOutcome::Denied)?;
            Err(Error::approval_denied(description.clone(), reason))
        };

        if !token.acknowledged_risk {
            return denial("risk acknowledgment missing");
        }

        let required = pattern.confirmation_phrase(target);
        if token.confirmation_phrase != required {
            return denial("confirmation phrase does not match");
        }

        self.record(&description, pattern, target, &artifact_id, AuditOutcome::Approved)?;
        info!("Approval granted: {} against {}", description, target);

        Ok(ApprovalDecision {
            pattern,
            operation: description,
            target: target.to_string(),
            artifact_id,
            approved_at: Utc::now(),
        })
    }

    fn record(
        &self,
        operation: &str,
        pattern: DangerPattern,
        target: &str,
        artifact_id: &Option<String>,
        outcome: AuditOutcome,
    ) -> Result<()> {
        self.audit.append(&AuditEntry {
            timestamp: Utc::now(),
            operation: operation.to_string(),
            pattern,
            target: target.to_string(),
            artifact_id: artifact_id.clone(),
            outcome,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use vaultsync_driver::MemoryDriver;

    struct Fixture {
        _dir: tempfile::TempDir,
        store: ArtifactStore,
        audit: AuditLog,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let base = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let store = ArtifactStore::new(base.join("backups"), 16).unwrap();
        let audit = AuditLog::new(base.join("audit.jsonl"));
        Fixture {
            _dir: dir,
            store,
            audit,
        }
    }

    fn token_for(pattern: DangerPattern, target: &str) -> ApprovalToken {
        ApprovalToken {
            acknowledged_risk: true,
            confirmation_phrase: pattern.confirmation_phrase(target),
        }
    }

    #[test]
    fn test_gate_transitions_are_strictly_ordered() {
        let mut guard = OperationGuard::new();
        guard.advance(GateState::BackupVerified).unwrap();
        guard.advance(GateState::Approved).unwrap();
        guard.advance(GateState::Executing).unwrap();
        assert!(guard.is_executing());
        guard.advance(GateState::Committed).unwrap();

        // Terminal states admit no further transitions
        let err = guard.advance(GateState::Executing).unwrap_err();
        assert!(matches!(err, Error::InvalidGateTransition { .. }));
    }

    #[test]
    fn test_gate_rejects_skipping_approval() {
        let mut guard = OperationGuard::new();
        guard.advance(GateState::BackupVerified).unwrap();
        let err = guard.advance(GateState::Executing).unwrap_err();
        assert!(matches!(err, Error::InvalidGateTransition { .. }));
    }

    #[tokio::test]
    async fn test_ensure_fresh_backup_creates_when_absent() {
        let f = fixture();
        let gate = SafetyGate::new(&f.store, &f.audit);
        let driver = MemoryDriver::with_label("production");
        driver.seed_rows("users", 20);

        let artifact = gate
            .ensure_fresh_backup(&driver, &["users".to_string()], 3600)
            .await
            .unwrap();
        assert_eq!(artifact.origin, "production");

        // Second call reuses the fresh artifact
        let again = gate
            .ensure_fresh_backup(&driver, &["users".to_string()], 3600)
            .await
            .unwrap();
        assert_eq!(again.id, artifact.id);
    }

    #[tokio::test]
    async fn test_ensure_fresh_backup_double_failure_is_fatal() {
        let f = fixture();
        let gate = SafetyGate::new(&f.store, &f.audit);
        let driver = MemoryDriver::with_label("production");
        driver.fail_dump(true);

        let err = gate
            .ensure_fresh_backup(&driver, &["users".to_string()], 3600)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BackupUnavailable { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_exact_phrase_required() {
        let f = fixture();
        let gate = SafetyGate::new(&f.store, &f.audit);
        let op = OperationKind::CascadeTruncate { table_count: 3 };

        // Exact phrase passes
        let token = token_for(DangerPattern::CascadeTruncate, "production");
        gate.require_approval(&op, "production", &token, None)
            .unwrap();

        // Empty, case-variant, and near-miss inputs are denials
        for phrase in ["", "OVERWRITE ALL DATA IN PRODUCTION", "overwrite all data in prod"] {
            let token = ApprovalToken {
                acknowledged_risk: true,
                confirmation_phrase: phrase.to_string(),
            };
            let err = gate
                .require_approval(&op, "production", &token, None)
                .unwrap_err();
            assert!(matches!(err, Error::ApprovalDenied { .. }), "{phrase:?}");
        }
    }

    #[test]
    fn test_missing_acknowledgment_is_denied() {
        let f = fixture();
        let gate = SafetyGate::new(&f.store, &f.audit);
        let op = OperationKind::CascadeTruncate { table_count: 3 };

        let mut token = token_for(DangerPattern::CascadeTruncate, "production");
        token.acknowledged_risk = false;

        let err = gate
            .require_approval(&op, "production", &token, None)
            .unwrap_err();
        assert!(matches!(err, Error::ApprovalDenied { .. }));
    }

    #[test]
    fn test_audit_written_for_both_outcomes() {
        let f = fixture();
        let gate = SafetyGate::new(&f.store, &f.audit);
        let op = OperationKind::CascadeTruncate { table_count: 3 };

        let good = token_for(DangerPattern::CascadeTruncate, "production");
        gate.require_approval(&op, "production", &good, None)
            .unwrap();

        let bad = ApprovalToken::default();
        let _ = gate.require_approval(&op, "production", &bad, None);

        let entries = f.audit.entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].outcome, AuditOutcome::Approved);
        assert_eq!(entries[1].outcome, AuditOutcome::Denied);
    }
}
