//! Restore command

use anyhow::{bail, Result};
use camino::Utf8Path;
use clap::Args;
use dialoguer::{Confirm, Input};
use vaultsync_backup::BackupArtifact;
use vaultsync_driver::{ConnectivityProbe, DatabaseDriver};
use vaultsync_restore::RestoreEngine;
use vaultsync_safety::{ApprovalToken, OperationKind, SafetyGate};

use crate::context::AppContext;
use crate::output;

#[derive(Args, Debug)]
pub struct RestoreArgs {
    /// Artifact id to restore
    pub id: String,

    /// Target endpoint label
    #[arg(short, long, default_value = "local")]
    pub endpoint: String,

    /// Append into existing tables instead of dropping them first
    #[arg(long)]
    pub no_drop_existing: bool,

    /// Acknowledge that the target's managed tables will be destroyed
    #[arg(long)]
    pub acknowledge_risk: bool,

    /// Confirmation phrase, for non-interactive use
    #[arg(long, requires = "acknowledge_risk")]
    pub confirm: Option<String>,
}

pub async fn run(args: RestoreArgs, config_path: Option<&Utf8Path>) -> Result<()> {
    let ctx = AppContext::load(config_path)?;
    let artifact = match ctx.store.get(&args.id)? {
        Some(artifact) => artifact,
        None => bail!("no artifact with id '{}'", args.id),
    };
    let target = ctx.driver_for(&args.endpoint)?;

    output::header("Restore");
    output::kv("Artifact", &artifact.id);
    output::kv("Origin", &artifact.origin);
    output::kv("Target", &target.endpoint().to_string());

    ConnectivityProbe::default().check(&target).await?;

    let engine = RestoreEngine::new(ctx.config.tables.clone());
    let validation = engine.validate(&artifact);
    if !validation.passed() {
        bail!(
            "artifact {} failed validation: {}",
            artifact.id,
            validation.failures.join("; ")
        );
    }

    // The restore overwrites the target, so it carries its own safety
    // backup and approval gate.
    let gate = SafetyGate::new(&ctx.store, &ctx.audit);
    let operation = OperationKind::RestoreOverwrite {
        table_count: artifact.tables.len(),
    };
    let safety_backup = gate
        .ensure_fresh_backup(
            &target,
            &ctx.table_names(),
            ctx.config.file.backup.max_age_seconds,
        )
        .await?;
    let token = approval_token(&args, &target.endpoint().label, &operation)?;
    let approval = gate.require_approval(
        &operation,
        &target.endpoint().label,
        &token,
        Some(&safety_backup),
    );
    if let Err(e) = approval {
        ctx.store.unpin(&safety_backup.id)?;
        return Err(e.into());
    }

    let outcome = apply(&engine, &artifact, &safety_backup, &target, !args.no_drop_existing).await;
    ctx.store.unpin(&safety_backup.id)?;
    outcome
}

async fn apply(
    engine: &RestoreEngine,
    artifact: &BackupArtifact,
    safety_backup: &BackupArtifact,
    target: &dyn DatabaseDriver,
    drop_existing: bool,
) -> Result<()> {
    let pb = output::spinner("Restoring artifact");
    let result = engine.restore(artifact, target, drop_existing).await;
    pb.finish_and_clear();

    if let Err(e) = result {
        output::error(&format!("Restore failed: {}", e));
        engine.rollback_to_safety_backup(safety_backup, target).await?;
        bail!(
            "restore of {} failed; target rolled back to {}",
            artifact.id,
            safety_backup.id
        );
    }

    let report = engine.verify(target, artifact).await?;
    for mismatch in report.mismatches() {
        output::warning(&format!(
            "{}: expected {} rows, found {}",
            mismatch.table, mismatch.expected, mismatch.actual
        ));
    }
    if report.all_matched() {
        output::success(&format!("Restored and verified {}", artifact.id));
    } else {
        output::warning(&format!(
            "Restored {} with row count mismatches",
            artifact.id
        ));
    }
    Ok(())
}

fn approval_token(
    args: &RestoreArgs,
    target: &str,
    operation: &OperationKind,
) -> Result<ApprovalToken> {
    if let Some(phrase) = &args.confirm {
        return Ok(ApprovalToken {
            acknowledged_risk: args.acknowledge_risk,
            confirmation_phrase: phrase.clone(),
        });
    }

    let pattern = match operation.classify() {
        Some(pattern) => pattern,
        None => return Ok(ApprovalToken::default()),
    };
    let phrase = pattern.confirmation_phrase(target);
    output::warning(&format!(
        "This will drop and recreate the managed tables on '{}'.",
        target
    ));
    let acknowledged = Confirm::new()
        .with_prompt("I understand the target data will be destroyed")
        .default(false)
        .interact()?;
    if !acknowledged {
        return Ok(ApprovalToken::default());
    }
    let typed: String = Input::new()
        .with_prompt(format!("Type '{}' to proceed", phrase))
        .allow_empty(true)
        .interact_text()?;

    Ok(ApprovalToken {
        acknowledged_risk: true,
        confirmation_phrase: typed,
    })
}
