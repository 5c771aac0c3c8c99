//! Configuration file loading and parsing.
//!
//! Configuration lives in `vaultsync.yaml` (or `.yml`) in the working
//! directory, or at an explicit path. A minimal file looks like:
//!
//! ```yaml
//! endpoints:
//!   local:
//!     label: local
//!     database: app
//!     user: app
//!   remote:
//!     label: production
//!     host: db.internal
//!     database: app
//!     user: app
//!     container: app-db
//! backup:
//!   directory: /var/backups/app
//!   retention_count: 5
//!   max_age_seconds: 86400
//! sync:
//!   batch_size: 10000
//!   index_rebuild_min_rows: 100
//! tables:
//!   - name: users
//!   - name: teams
//!     depends_on: [users]
//!   - name: events
//!     depends_on: [teams]
//!     large: true
//!     indexed: true
//!     index_ddl:
//!       - CREATE INDEX idx_events_embedding ON events USING ivfflat (embedding)
//! ```

use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::tables::{ManagedTables, TableSpec};
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::fs;

/// Configuration file names to search for
const CONFIG_FILE_NAMES: &[&str] = &["vaultsync.yaml", "vaultsync.yml"];

/// Minimum plausible artifact size in bytes. Anything smaller is
/// treated as a failed dump regardless of exit status.
pub const DEFAULT_MIN_ARTIFACT_BYTES: u64 = 1024;

/// Raw configuration file contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigFile {
    pub endpoints: EndpointsConfig,

    #[serde(default)]
    pub backup: BackupConfig,

    #[serde(default)]
    pub sync: SyncConfig,

    pub tables: Vec<TableSpec>,
}

/// The local/remote endpoint pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointsConfig {
    pub local: Endpoint,
    pub remote: Endpoint,
}

/// Backup artifact settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Directory holding backup artifacts and manifests
    #[serde(default = "default_backup_directory")]
    pub directory: Utf8PathBuf,

    /// How many artifacts retention keeps
    #[serde(default = "default_retention_count")]
    pub retention_count: usize,

    /// Freshness threshold for `latest()` in seconds
    #[serde(default = "default_max_age_seconds")]
    pub max_age_seconds: u64,

    /// Size floor below which an artifact is treated as a failed dump
    #[serde(default = "default_min_artifact_bytes")]
    pub min_artifact_bytes: u64,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            directory: default_backup_directory(),
            retention_count: default_retention_count(),
            max_age_seconds: default_max_age_seconds(),
            min_artifact_bytes: default_min_artifact_bytes(),
        }
    }
}

/// Sync orchestration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Rows per window when copying a `large` table
    #[serde(default = "default_batch_size")]
    pub batch_size: u64,

    /// Skip index recreation for tables that loaded fewer rows than this
    #[serde(default = "default_index_rebuild_min_rows")]
    pub index_rebuild_min_rows: u64,

    /// Exclusive target lease time-to-live in seconds
    #[serde(default = "default_lease_ttl_seconds")]
    pub lease_ttl_seconds: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            index_rebuild_min_rows: default_index_rebuild_min_rows(),
            lease_ttl_seconds: default_lease_ttl_seconds(),
        }
    }
}

fn default_backup_directory() -> Utf8PathBuf {
    Utf8PathBuf::from("./backups")
}

fn default_retention_count() -> usize {
    5
}

fn default_max_age_seconds() -> u64 {
    86_400
}

fn default_min_artifact_bytes() -> u64 {
    DEFAULT_MIN_ARTIFACT_BYTES
}

fn default_batch_size() -> u64 {
    10_000
}

fn default_index_rebuild_min_rows() -> u64 {
    100
}

fn default_lease_ttl_seconds() -> u64 {
    7_200
}

/// Loaded and validated vaultsync configuration.
#[derive(Debug, Clone)]
pub struct VaultsyncConfig {
    /// The parsed configuration file
    pub file: ConfigFile,

    /// Dependency-ordered managed tables built from `file.tables`
    pub tables: ManagedTables,

    /// Path the configuration was loaded from
    pub config_path: Utf8PathBuf,
}

impl VaultsyncConfig {
    /// Load configuration from the specified path or search for it
    /// in the working directory.
    pub fn load(path: Option<&Utf8Path>) -> Result<Self> {
        let (config_path, content) = if let Some(p) = path {
            let content = fs::read_to_string(p).map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    Error::config_not_found(p.as_str())
                } else {
                    Error::Io(e)
                }
            })?;
            (p.to_owned(), content)
        } else {
            Self::find_config()?
        };

        let file: ConfigFile = serde_yaml_ng::from_str(&content)?;
        Self::from_file(file, config_path)
    }

    /// Build a config from already-parsed contents (tests, embedding).
    pub fn from_file(file: ConfigFile, config_path: Utf8PathBuf) -> Result<Self> {
        if file.endpoints.local.label == file.endpoints.remote.label {
            return Err(Error::invalid_config(
                "local and remote endpoints must have distinct labels",
            ));
        }
        if file.sync.batch_size == 0 {
            return Err(Error::invalid_config("sync.batch_size must be positive"));
        }
        if file.backup.retention_count == 0 {
            return Err(Error::invalid_config(
                "backup.retention_count must be positive",
            ));
        }

        let tables = ManagedTables::new(file.tables.clone())?;

        Ok(Self {
            file,
            tables,
            config_path,
        })
    }

    fn find_config() -> Result<(Utf8PathBuf, String)> {
        for name in CONFIG_FILE_NAMES {
            let path = Utf8PathBuf::from(name);
            if let Ok(content) = fs::read_to_string(&path) {
                return Ok((path, content));
            }
        }
        Err(Error::config_not_found(CONFIG_FILE_NAMES.join(" or ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
endpoints:
  local:
    label: local
    database: app
    user: app
  remote:
    label: production
    host: db.internal
    database: app
    user: app
    container: app-db
tables:
  - name: users
  - name: teams
    depends_on: [users]
  - name: events
    depends_on: [teams]
    large: true
"#;

    #[test]
    fn test_load_sample_with_defaults() {
        let file: ConfigFile = serde_yaml_ng::from_str(SAMPLE).unwrap();
        let config = VaultsyncConfig::from_file(file, Utf8PathBuf::from("vaultsync.yaml")).unwrap();

        assert_eq!(config.file.sync.batch_size, 10_000);
        assert_eq!(config.file.backup.retention_count, 5);
        assert_eq!(config.file.backup.max_age_seconds, 86_400);
        assert_eq!(config.tables.names(), vec!["users", "teams", "events"]);
        assert!(config.tables.get("events").unwrap().large);
    }

    #[test]
    fn test_identical_labels_rejected() {
        let mut file: ConfigFile = serde_yaml_ng::from_str(SAMPLE).unwrap();
        file.endpoints.remote.label = "local".to_string();
        let err = VaultsyncConfig::from_file(file, Utf8PathBuf::from("x.yaml")).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig { .. }));
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let mut file: ConfigFile = serde_yaml_ng::from_str(SAMPLE).unwrap();
        file.sync.batch_size = 0;
        assert!(VaultsyncConfig::from_file(file, Utf8PathBuf::from("x.yaml")).is_err());
    }

    #[test]
    fn test_missing_file_is_config_not_found() {
        let err = VaultsyncConfig::load(Some(Utf8Path::new("/nonexistent/vaultsync.yaml")))
            .unwrap_err();
        assert!(matches!(err, Error::ConfigNotFound { .. }));
    }
}
