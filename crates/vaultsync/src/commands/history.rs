//! History command

use anyhow::{bail, Result};
use camino::Utf8Path;
use vaultsync_sync::SyncRecord;

use crate::cli::HistoryArgs;
use crate::context::AppContext;
use crate::output;

pub fn run(args: HistoryArgs, config_path: Option<&Utf8Path>) -> Result<()> {
    let ctx = AppContext::load(config_path)?;

    if let Some(id) = &args.id {
        let record = match ctx.history.get(id)? {
            Some(record) => record,
            None => bail!("no sync run with id '{}'", id),
        };
        if args.json {
            println!("{}", serde_json::to_string_pretty(&record)?);
        } else {
            show_full(&record);
        }
        return Ok(());
    }

    let records = ctx.history.recent(args.limit)?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }
    if records.is_empty() {
        output::info("No sync runs recorded");
        return Ok(());
    }

    output::header(&format!("Sync History ({})", records.len()));
    for record in &records {
        output::kv(
            &record.id,
            &format!(
                "{} {} -> {} | {:?} | {} | {}s",
                record.direction,
                record.source,
                record.target,
                record.status,
                record.started_at.format("%Y-%m-%d %H:%M:%S"),
                record.duration_seconds()
            ),
        );
    }
    Ok(())
}

fn show_full(record: &SyncRecord) {
    output::header(&format!("Sync {}", record.id));
    output::kv("Direction", &record.direction.to_string());
    output::kv("Source", &record.source);
    output::kv("Target", &record.target);
    output::kv("Status", &format!("{:?}", record.status));
    output::kv("Phase reached", &format!("{:?}", record.phase));
    output::kv("Started", &record.started_at.to_rfc3339());
    if let Some(completed) = record.completed_at {
        output::kv("Completed", &completed.to_rfc3339());
    }
    if let Some(error) = &record.error {
        output::kv("Error", error);
    }
    for (name, progress) in &record.tables {
        output::kv(
            name,
            &format!(
                "{}/{} rows in {} windows",
                progress.rows_done,
                progress.rows_total,
                progress.windows.len()
            ),
        );
    }
    for warning in &record.warnings {
        output::warning(warning);
    }
    for action in &record.planned_actions {
        println!("  - {}", action);
    }
}
