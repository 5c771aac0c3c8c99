//! Sync command

use anyhow::{bail, Result};
use camino::Utf8Path;
use clap::{Args, ValueEnum};
use dialoguer::{Confirm, Input};
use vaultsync_core::Direction;
use vaultsync_safety::{ApprovalToken, DangerPattern};
use vaultsync_sync::{SyncOrchestrator, SyncPlan, SyncRecord, SyncStatus};

use crate::context::AppContext;
use crate::output;

#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Sync direction
    #[arg(value_enum)]
    pub direction: SyncDirection,

    /// Show what would happen without touching either database
    #[arg(long)]
    pub dry_run: bool,

    /// Rows per copy window (default: configured batch size)
    #[arg(long)]
    pub batch_size: Option<u64>,

    /// Skip the fresh safety backup (only legal against an empty
    /// target that already has a verified backup)
    #[arg(long)]
    pub skip_safety_backup: bool,

    /// Acknowledge that the target's managed tables will be destroyed
    #[arg(long)]
    pub acknowledge_risk: bool,

    /// Confirmation phrase, for non-interactive use
    #[arg(long, requires = "acknowledge_risk")]
    pub confirm: Option<String>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum SyncDirection {
    /// Local is the source, remote is the target
    Push,
    /// Remote is the source, local is the target
    Pull,
}

impl From<SyncDirection> for Direction {
    fn from(d: SyncDirection) -> Self {
        match d {
            SyncDirection::Push => Direction::Push,
            SyncDirection::Pull => Direction::Pull,
        }
    }
}

pub async fn run(args: SyncArgs, config_path: Option<&Utf8Path>) -> Result<()> {
    let ctx = AppContext::load(config_path)?;
    let direction: Direction = args.direction.into();
    let (source_ep, target_ep) = direction.resolve(
        &ctx.config.file.endpoints.local,
        &ctx.config.file.endpoints.remote,
    );

    output::header(&format!("Sync ({})", direction));
    output::kv("Source", &source_ep.to_string());
    output::kv("Target", &target_ep.to_string());
    output::kv("Tables", &ctx.config.tables.len().to_string());
    if args.dry_run {
        output::kv("Mode", "dry run");
    }

    let mut plan = if args.dry_run {
        SyncPlan::dry_run()
    } else {
        SyncPlan::new(approval_token(&args, &target_ep.label, ctx.config.tables.len())?)
    };
    plan.batch_size = args.batch_size;
    plan.skip_safety_backup = args.skip_safety_backup;

    let source = ctx.driver_for(&source_ep.label)?;
    let target = ctx.driver_for(&target_ep.label)?;
    let orchestrator = SyncOrchestrator::new(
        &ctx.config,
        &source,
        &target,
        &ctx.store,
        &ctx.audit,
        &ctx.history,
        ctx.state_dir.clone(),
    );

    // First Ctrl-C unwinds cleanly between steps; the record shows how
    // far the run got either way.
    let cancel = orchestrator.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            output::warning("Interrupt received, unwinding at the next safe point");
            cancel.cancel();
        }
    });

    let record = orchestrator.run(&plan).await?;
    report(&record)
}

/// Two-stage approval for the destructive truncate-and-replace, from
/// flags when provided or interactively otherwise.
fn approval_token(args: &SyncArgs, target: &str, table_count: usize) -> Result<ApprovalToken> {
    if let Some(phrase) = &args.confirm {
        return Ok(ApprovalToken {
            acknowledged_risk: args.acknowledge_risk,
            confirmation_phrase: phrase.clone(),
        });
    }

    let phrase = DangerPattern::CascadeTruncate.confirmation_phrase(target);
    output::warning(&format!(
        "This will destroy all rows in {} managed tables on '{}' and replace them from the source.",
        table_count, target
    ));
    let acknowledged = Confirm::new()
        .with_prompt("I understand the target data will be destroyed")
        .default(false)
        .interact()?;
    if !acknowledged {
        // Let the gate record the denial rather than bailing here.
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

fn report(record: &SyncRecord) -> Result<()> {
    if record.dry_run {
        output::header("Planned actions");
        for action in &record.planned_actions {
            println!("  - {}", action);
        }
        output::success(&format!(
            "Dry run complete: {} actions planned, nothing executed",
            record.planned_actions.len()
        ));
        return Ok(());
    }

    if !record.tables.is_empty() {
        output::header("Tables");
        for (name, progress) in &record.tables {
            let verified = match progress.verified {
                Some(true) => "verified",
                Some(false) => "count mismatch",
                None => "unverified",
            };
            output::kv(
                name,
                &format!(
                    "{}/{} rows in {} windows ({})",
                    progress.rows_done,
                    progress.rows_total,
                    progress.windows.len(),
                    verified
                ),
            );
        }
    }
    for warning in &record.warnings {
        output::warning(warning);
    }

    match record.status {
        SyncStatus::Completed => {
            output::success(&format!(
                "Sync {} completed in {}s",
                record.id,
                record.duration_seconds()
            ));
            Ok(())
        }
        SyncStatus::CompletedWithWarnings => {
            output::warning(&format!(
                "Sync {} completed with warnings in {}s",
                record.id,
                record.duration_seconds()
            ));
            Ok(())
        }
        SyncStatus::CompletedWithErrors => {
            bail!(
                "sync {} completed with errors: {}",
                record.id,
                record.error.as_deref().unwrap_or("verification failed")
            )
        }
        SyncStatus::Cancelled => match &record.error {
            Some(reason) => bail!("sync {} aborted: {}", record.id, reason),
            None => bail!("sync {} cancelled", record.id),
        },
        SyncStatus::Failed => bail!(
            "sync {} failed: {}",
            record.id,
            record.error.as_deref().unwrap_or("unknown error")
        ),
        SyncStatus::Running => bail!("sync {} is still running", record.id),
    }
}
