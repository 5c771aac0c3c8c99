//! Backup commands

use anyhow::{bail, Result};
use camino::Utf8Path;
use vaultsync_backup::IntegrityStatus;

use crate::cli::{BackupCommands, BackupCreateArgs, BackupListArgs, BackupPruneArgs, BackupVerifyArgs};
use crate::context::AppContext;
use crate::output;

pub async fn run(command: BackupCommands, config_path: Option<&Utf8Path>) -> Result<()> {
    match command {
        BackupCommands::Create(args) => create(args, config_path).await,
        BackupCommands::List(args) => list(args, config_path),
        BackupCommands::Verify(args) => verify(args, config_path),
        BackupCommands::Prune(args) => prune(args, config_path),
    }
}

async fn create(args: BackupCreateArgs, config_path: Option<&Utf8Path>) -> Result<()> {
    let ctx = AppContext::load(config_path)?;
    let driver = ctx.driver_for(&args.endpoint)?;

    output::header("Create Backup");
    output::kv("Endpoint", &ctx.endpoint(&args.endpoint)?.to_string());

    let pb = output::spinner("Dumping, compressing, and verifying");
    let result = ctx.store.create(&driver, &ctx.table_names()).await;
    pb.finish_and_clear();

    let artifact = result?;
    output::kv("Artifact", &artifact.id);
    output::kv("Path", artifact.path.as_str());
    output::kv("Size", &format!("{} bytes", artifact.size_bytes));
    output::kv(
        "Rows",
        &artifact.row_counts.values().sum::<u64>().to_string(),
    );
    output::success("Backup created and verified");
    Ok(())
}

fn list(args: BackupListArgs, config_path: Option<&Utf8Path>) -> Result<()> {
    let ctx = AppContext::load(config_path)?;
    let artifacts = ctx.store.list()?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&artifacts)?);
        return Ok(());
    }

    if artifacts.is_empty() {
        output::info("No backup artifacts found");
        return Ok(());
    }

    output::header(&format!("Backup Artifacts ({})", artifacts.len()));
    for artifact in &artifacts {
        output::kv(
            &artifact.id,
            &format!(
                "{} | {} bytes | {} | {}",
                artifact.origin,
                artifact.size_bytes,
                artifact.created_at.format("%Y-%m-%d %H:%M:%S"),
                integrity_label(&artifact.integrity)
            ),
        );
    }
    Ok(())
}

fn verify(args: BackupVerifyArgs, config_path: Option<&Utf8Path>) -> Result<()> {
    let ctx = AppContext::load(config_path)?;
    let mut artifact = match ctx.store.get(&args.id)? {
        Some(artifact) => artifact,
        None => bail!("no artifact with id '{}'", args.id),
    };

    let pb = output::spinner("Verifying artifact integrity");
    let ok = ctx.store.verify_integrity(&mut artifact)?;
    pb.finish_and_clear();

    output::kv("Artifact", &artifact.id);
    output::kv("Integrity", integrity_label(&artifact.integrity));
    if ok {
        output::success("Artifact verified");
        Ok(())
    } else {
        bail!("artifact {} failed integrity verification", artifact.id)
    }
}

fn prune(args: BackupPruneArgs, config_path: Option<&Utf8Path>) -> Result<()> {
    let ctx = AppContext::load(config_path)?;
    let keep = args.keep.unwrap_or(ctx.config.file.backup.retention_count);

    let removed = ctx.store.apply_retention(keep)?;
    output::success(&format!(
        "Removed {} artifacts, keeping the newest {}",
        removed, keep
    ));
    Ok(())
}

fn integrity_label(status: &IntegrityStatus) -> &'static str {
    match status {
        IntegrityStatus::Verified => "verified",
        IntegrityStatus::Unverified => "unverified",
        IntegrityStatus::Corrupt => "corrupt",
    }
}
