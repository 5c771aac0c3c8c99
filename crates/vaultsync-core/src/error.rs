//! Error types for vaultsync-core

use thiserror::Error;

/// Result type alias using vaultsync-core's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error taxonomy for the backup/restore/sync pipeline.
///
/// Variants map one-to-one onto the pipeline's failure semantics:
/// some are fatal to the guarded operation (`BackupUnavailable`,
/// `Unrecoverable`), some are normal operator-abort paths
/// (`ApprovalDenied`), and some are advisory (`VerificationMismatch`).
#[derive(Error, Debug)]
pub enum Error {
    /// A database endpoint failed its connectivity probe
    #[error("Endpoint unreachable: {label} ({detail})")]
    EndpointUnreachable { label: String, detail: String },

    /// No fresh backup exists and creating one failed; the guarded
    /// operation must not proceed
    #[error("No usable backup available: {reason}")]
    BackupUnavailable { reason: String },

    /// The operator declined (or failed) the two-stage confirmation
    #[error("Approval denied for {operation}: {reason}")]
    ApprovalDenied { operation: String, reason: String },

    /// The export process failed or produced an implausible artifact
    #[error("Dump failed for {source_label}: {detail}")]
    DumpFailed { source_label: String, detail: String },

    /// A restore aborted; remaining tables were not attempted
    #[error("Restore failed at table '{table}': {detail}")]
    RestoreFailed { table: String, detail: String },

    /// Row counts diverged between expectation and observation
    #[error("Verification mismatch on '{table}': expected {expected}, found {actual}")]
    VerificationMismatch {
        table: String,
        expected: u64,
        actual: u64,
    },

    /// Rollback to the safety backup itself failed; manual recovery
    /// required, starting from the surfaced backup path
    #[error(
        "UNRECOVERABLE: rollback failed ({detail}); manual restore required from safety backup at {safety_backup_path}"
    )]
    Unrecoverable {
        detail: String,
        safety_backup_path: String,
    },

    /// Another destructive operation holds the lease on this target
    #[error("Operation already in progress against target '{target}' (lease held by {holder})")]
    OperationInProgress { target: String, holder: String },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Invalid configuration
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// Managed table list contains a dependency cycle
    #[error("Circular table dependency detected: {cycle}")]
    CircularDependency { cycle: String },

    /// Unknown managed table referenced
    #[error("Unknown table: {table}")]
    UnknownTable { table: String },

    /// A gate transition was attempted out of order
    #[error("Invalid gate transition: {from} -> {to}")]
    InvalidGateTransition { from: String, to: String },

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    YamlParse(#[from] serde_yaml_ng::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Driver-level failure that does not fit a narrower variant
    #[error("Database driver error: {0}")]
    Driver(String),
}

impl Error {
    /// Create an endpoint unreachable error
    pub fn endpoint_unreachable(label: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::EndpointUnreachable {
            label: label.into(),
            detail: detail.into(),
        }
    }

    /// Create a backup unavailable error
    pub fn backup_unavailable(reason: impl Into<String>) -> Self {
        Self::BackupUnavailable {
            reason: reason.into(),
        }
    }

    /// Create an approval denied error
    pub fn approval_denied(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ApprovalDenied {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create a dump failed error
    pub fn dump_failed(source_label: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::DumpFailed {
            source_label: source_label.into(),
            detail: detail.into(),
        }
    }

    /// Create a restore failed error
    pub fn restore_failed(table: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::RestoreFailed {
            table: table.into(),
            detail: detail.into(),
        }
    }

    /// Create an unrecoverable error, surfacing the safety backup path
    pub fn unrecoverable(detail: impl Into<String>, safety_backup_path: impl Into<String>) -> Self {
        Self::Unrecoverable {
            detail: detail.into(),
            safety_backup_path: safety_backup_path.into(),
        }
    }

    /// Create an operation in progress error
    pub fn operation_in_progress(target: impl Into<String>, holder: impl Into<String>) -> Self {
        Self::OperationInProgress {
            target: target.into(),
            holder: holder.into(),
        }
    }

    /// Create a config not found error
    pub fn config_not_found(path: impl Into<String>) -> Self {
        Self::ConfigNotFound { path: path.into() }
    }

    /// Create an invalid config error
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Create a circular dependency error
    pub fn circular_dependency(cycle: impl Into<String>) -> Self {
        Self::CircularDependency {
            cycle: cycle.into(),
        }
    }

    /// Create a driver error
    pub fn driver(detail: impl Into<String>) -> Self {
        Self::Driver(detail.into())
    }

    /// True when the error must stop the guarded operation outright
    /// (as opposed to a normal abort or an advisory mismatch).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::BackupUnavailable { .. } | Self::Unrecoverable { .. }
        )
    }

    /// Process exit code for this error, so scripts can branch on the
    /// failure class without parsing stderr. 1 is the generic failure
    /// code; 2 is reserved for usage errors.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::EndpointUnreachable { .. } => 3,
            Self::BackupUnavailable { .. } | Self::DumpFailed { .. } => 4,
            Self::ApprovalDenied { .. } => 5,
            Self::RestoreFailed { .. } | Self::VerificationMismatch { .. } => 6,
            Self::OperationInProgress { .. } => 7,
            Self::Unrecoverable { .. } => 8,
            _ => 1,
        }
    }
}
