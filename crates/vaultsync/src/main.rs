//! Vaultsync CLI - safety-gated database backup, restore, and sync
//!
//! This is the main entry point for the vaultsync command-line
//! interface.

mod cli;
mod commands;
mod context;
mod output;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::{Cli, Commands};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_tracing(cli.verbose, cli.quiet);

    if let Err(err) = run(cli).await {
        output::error(&format!("{:#}", err));
        std::process::exit(exit_code(&err));
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Sync(args) => commands::sync::run(args, cli.config.as_deref()).await,
        Commands::Backup(args) => commands::backup::run(args, cli.config.as_deref()).await,
        Commands::Restore(args) => commands::restore::run(args, cli.config.as_deref()).await,
        Commands::Validate(args) => commands::validate::run(args, cli.config.as_deref()).await,
        Commands::History(args) => commands::history::run(args, cli.config.as_deref()),
        Commands::Audit(args) => commands::audit::run(args, cli.config.as_deref()),
        Commands::Config(args) => commands::config::run(args, cli.config.as_deref()),
    }
}

/// Failure-class exit code, taken from the pipeline error taxonomy
/// when one is in the chain. Generic failures exit 1; clap keeps 2.
fn exit_code(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<vaultsync_core::Error>()
        .map(vaultsync_core::Error::exit_code)
        .unwrap_or(1)
}

/// Initialize tracing with appropriate verbosity
fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();
}
