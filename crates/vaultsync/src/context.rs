//! Shared command context: config, state directory, stores.

use anyhow::{bail, Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use vaultsync_backup::ArtifactStore;
use vaultsync_core::{Endpoint, VaultsyncConfig};
use vaultsync_driver::PostgresDriver;
use vaultsync_safety::AuditLog;
use vaultsync_sync::SyncHistory;

/// Everything a command needs to talk to the pipeline.
pub struct AppContext {
    pub config: VaultsyncConfig,
    pub state_dir: Utf8PathBuf,
    pub store: ArtifactStore,
    pub audit: AuditLog,
    pub history: SyncHistory,
}

impl AppContext {
    pub fn load(config_path: Option<&Utf8Path>) -> Result<Self> {
        let config = VaultsyncConfig::load(config_path)?;
        let state_dir = default_state_dir()?;

        let store = ArtifactStore::new(
            config.file.backup.directory.clone(),
            config.file.backup.min_artifact_bytes,
        )
        .context("failed to open the backup artifact store")?;
        let audit = AuditLog::in_state_dir(&state_dir)?;
        let history = SyncHistory::in_state_dir(&state_dir)?;

        Ok(Self {
            config,
            state_dir,
            store,
            audit,
            history,
        })
    }

    /// The configured endpoint with the given label.
    pub fn endpoint(&self, label: &str) -> Result<&Endpoint> {
        let endpoints = &self.config.file.endpoints;
        if endpoints.local.label == label {
            Ok(&endpoints.local)
        } else if endpoints.remote.label == label {
            Ok(&endpoints.remote)
        } else {
            bail!(
                "unknown endpoint '{}' (configured: '{}', '{}')",
                label,
                endpoints.local.label,
                endpoints.remote.label
            )
        }
    }

    pub fn driver_for(&self, label: &str) -> Result<PostgresDriver> {
        Ok(PostgresDriver::new(self.endpoint(label)?.clone()))
    }

    pub fn table_names(&self) -> Vec<String> {
        self.config
            .tables
            .names()
            .iter()
            .map(|s| s.to_string())
            .collect()
    }
}

fn default_state_dir() -> Result<Utf8PathBuf> {
    let base = dirs::data_local_dir().unwrap_or_else(|| std::path::PathBuf::from("."));
    let path = base.join("vaultsync");
    Utf8PathBuf::from_path_buf(path)
        .map_err(|p| anyhow::anyhow!("state directory is not valid UTF-8: {}", p.display()))
}
