//! Audit ledger command

use anyhow::Result;
use camino::Utf8Path;
use vaultsync_safety::{AuditOutcome, DEFAULT_AUDIT_TAIL_LINES};

use crate::cli::AuditArgs;
use crate::context::AppContext;
use crate::output;

pub fn run(args: AuditArgs, config_path: Option<&Utf8Path>) -> Result<()> {
    let ctx = AppContext::load(config_path)?;
    let limit = args.limit.unwrap_or(DEFAULT_AUDIT_TAIL_LINES);
    let entries = ctx.audit.tail(limit)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }
    if entries.is_empty() {
        output::info("Audit ledger is empty");
        return Ok(());
    }

    output::header(&format!("Audit Ledger (last {})", entries.len()));
    for entry in &entries {
        let outcome = match entry.outcome {
            AuditOutcome::Approved => "approved",
            AuditOutcome::Denied => "DENIED",
        };
        let artifact = entry.artifact_id.as_deref().unwrap_or("-");
        println!(
            "  {} | {} | {} on '{}' | backup {} | {}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            entry.pattern,
            entry.operation,
            entry.target,
            artifact,
            outcome
        );
    }
    Ok(())
}
