//! Core types for the vaultsync pipeline.
//!
//! This crate holds the shared vocabulary of the backup/restore/sync
//! system: the error taxonomy, configuration loading, the managed
//! table set with its dependency ordering, and endpoint/direction
//! types. Higher-level crates (driver, backup, restore, safety, sync)
//! all build on these.

pub mod config;
pub mod endpoint;
pub mod error;
pub mod tables;

pub use config::{BackupConfig, ConfigFile, SyncConfig, VaultsyncConfig};
pub use endpoint::{Direction, Endpoint};
pub use error::{Error, Result};
pub use tables::{ManagedTables, TableSpec};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
