//! Backup artifact metadata.
//!
//! Every artifact is a gzip-compressed SQL dump with a JSON manifest
//! sidecar (`<artifact>.manifest.json`) recording provenance, the
//! table set, row counts at dump time, and checksum information.

use camino::Utf8PathBuf;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use vaultsync_core::Result;

/// Version of the manifest format.
pub const MANIFEST_VERSION: &str = "1.0.0";

/// Suffix appended to the artifact path to form the manifest path.
pub const MANIFEST_SUFFIX: &str = ".manifest.json";

/// Integrity state of a backup artifact.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IntegrityStatus {
    /// Streaming read pass and checksum both succeeded
    Verified,
    /// Not yet checked
    Unverified,
    /// A check failed; the artifact must never be restored
    Corrupt,
}

/// Checksum information for integrity verification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChecksumInfo {
    /// Hash algorithm (sha256)
    pub algorithm: String,

    /// Hex-encoded checksum of the compressed artifact
    pub value: String,
}

/// One point-in-time export of the managed tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupArtifact {
    /// Manifest format version
    pub version: String,

    /// Timestamped identifier, also the artifact file stem
    pub id: String,

    /// Path of the compressed dump on durable storage
    pub path: Utf8PathBuf,

    /// Compressed size in bytes
    pub size_bytes: u64,

    /// Uncompressed dump size in bytes
    pub uncompressed_bytes: u64,

    /// Integrity state
    pub integrity: IntegrityStatus,

    /// Tables included in the export, restore-ordered
    pub tables: Vec<String>,

    /// Row counts per table at dump time
    #[serde(default)]
    pub row_counts: BTreeMap<String, u64>,

    /// When the export was taken
    pub created_at: DateTime<Utc>,

    /// Label of the endpoint the export was taken from
    pub origin: String,

    /// Checksum of the compressed artifact
    pub checksum: ChecksumInfo,
}

impl BackupArtifact {
    /// Path of the manifest sidecar for this artifact.
    pub fn manifest_path(&self) -> Utf8PathBuf {
        Utf8PathBuf::from(format!("{}{}", self.path, MANIFEST_SUFFIX))
    }

    /// Age of the artifact relative to now.
    pub fn age_seconds(&self) -> i64 {
        (Utc::now() - self.created_at).num_seconds()
    }

    /// Serialize the manifest to pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse a manifest from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Write the manifest sidecar next to the artifact.
    pub fn write_manifest(&self) -> Result<()> {
        std::fs::write(self.manifest_path().as_std_path(), self.to_json()?)?;
        Ok(())
    }
}
