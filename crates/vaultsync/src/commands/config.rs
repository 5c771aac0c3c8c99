//! Config commands

use anyhow::Result;
use camino::Utf8Path;
use vaultsync_core::VaultsyncConfig;

use crate::cli::{ConfigCommands, ConfigShowArgs, ConfigValidateArgs};
use crate::output;

pub fn run(command: ConfigCommands, config_path: Option<&Utf8Path>) -> Result<()> {
    match command {
        ConfigCommands::Validate(args) => validate(args, config_path),
        ConfigCommands::Show(args) => show(args, config_path),
    }
}

fn validate(args: ConfigValidateArgs, config_path: Option<&Utf8Path>) -> Result<()> {
    let path = args.file.as_deref().or(config_path);
    let config = VaultsyncConfig::load(path)?;

    output::kv("Config", config.config_path.as_str());
    output::kv("Endpoints", &format!(
        "{}, {}",
        config.file.endpoints.local.label, config.file.endpoints.remote.label
    ));
    output::kv("Tables", &config.tables.len().to_string());
    output::success("Configuration is valid");
    Ok(())
}

fn show(args: ConfigShowArgs, config_path: Option<&Utf8Path>) -> Result<()> {
    let config = VaultsyncConfig::load(config_path)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&config.file)?);
        return Ok(());
    }

    output::header("Configuration");
    output::kv("Config file", config.config_path.as_str());
    output::kv("Local", &config.file.endpoints.local.to_string());
    output::kv("Remote", &config.file.endpoints.remote.to_string());
    output::kv("Backup directory", config.file.backup.directory.as_str());
    output::kv(
        "Retention",
        &format!("{} artifacts", config.file.backup.retention_count),
    );
    output::kv(
        "Batch size",
        &config.file.sync.batch_size.to_string(),
    );

    output::header("Managed tables (restore order)");
    for spec in config.tables.in_restore_order() {
        let mut notes = Vec::new();
        if spec.large {
            notes.push("large".to_string());
        }
        if spec.indexed {
            notes.push(format!("{} indexes", spec.index_ddl.len()));
        }
        if !spec.depends_on.is_empty() {
            notes.push(format!("depends on {}", spec.depends_on.join(", ")));
        }
        let detail = if notes.is_empty() {
            "-".to_string()
        } else {
            notes.join(" | ")
        };
        output::kv(&spec.name, &detail);
    }
    Ok(())
}
