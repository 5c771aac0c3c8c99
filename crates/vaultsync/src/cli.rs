//! CLI argument parsing with clap

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};

// Re-export command types for convenience
pub use crate::commands::restore::RestoreArgs;
pub use crate::commands::sync::SyncArgs;

/// Vaultsync - safety-gated database backup, restore, and sync
#[derive(Parser, Debug)]
#[command(name = "vaultsync")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to vaultsync.yaml config file
    #[arg(short, long, global = true)]
    pub config: Option<Utf8PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Sync managed tables between the local and remote databases
    Sync(SyncArgs),

    /// Backup artifact management
    #[command(subcommand)]
    Backup(BackupCommands),

    /// Restore a backup artifact into a database
    Restore(RestoreArgs),

    /// Prove an artifact restorable via an ephemeral test restore
    Validate(ValidateArgs),

    /// Show past sync runs
    History(HistoryArgs),

    /// Show the dangerous-operation audit ledger
    Audit(AuditArgs),

    /// Configuration management
    #[command(subcommand)]
    Config(ConfigCommands),
}

// Backup commands
#[derive(Subcommand, Debug)]
pub enum BackupCommands {
    /// Create a backup of one endpoint's managed tables
    Create(BackupCreateArgs),

    /// List stored backup artifacts
    List(BackupListArgs),

    /// Re-verify one artifact's integrity
    Verify(BackupVerifyArgs),

    /// Remove artifacts beyond the retention count
    Prune(BackupPruneArgs),
}

#[derive(Args, Debug)]
pub struct BackupCreateArgs {
    /// Endpoint label to back up
    #[arg(default_value = "local")]
    pub endpoint: String,
}

#[derive(Args, Debug)]
pub struct BackupListArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct BackupVerifyArgs {
    /// Artifact id
    pub id: String,
}

#[derive(Args, Debug)]
pub struct BackupPruneArgs {
    /// Keep this many artifacts (default: configured retention count)
    #[arg(short, long)]
    pub keep: Option<usize>,
}

// Validate command
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Artifact id (default: newest verified artifact for the endpoint)
    pub id: Option<String>,

    /// Endpoint whose engine hosts the ephemeral restore
    #[arg(short, long, default_value = "local")]
    pub endpoint: String,
}

// History command
#[derive(Args, Debug)]
pub struct HistoryArgs {
    /// Show one sync run in full
    pub id: Option<String>,

    /// Number of runs to show
    #[arg(short, long, default_value = "10")]
    pub limit: usize,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// Audit command
#[derive(Args, Debug)]
pub struct AuditArgs {
    /// Number of entries to show
    #[arg(short, long)]
    pub limit: Option<usize>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// Config commands
#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Validate the configuration
    Validate(ConfigValidateArgs),

    /// Show resolved configuration
    Show(ConfigShowArgs),
}

#[derive(Args, Debug)]
pub struct ConfigValidateArgs {
    /// Path to config file (default: find vaultsync.yaml)
    #[arg(short, long)]
    pub file: Option<Utf8PathBuf>,
}

#[derive(Args, Debug)]
pub struct ConfigShowArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}
