//! Typed destructive-operation descriptors.
//!
//! Components declare what they are about to do as an [`OperationKind`]
//! value; classification is a direct match on this closed enum rather
//! than pattern-matching serialized command text.

use serde::{Deserialize, Serialize};
use std::fmt;

/// What a calling component is about to execute.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OperationKind {
    /// Remove all rows from the managed set with cascade semantics
    CascadeTruncate { table_count: usize },

    /// Drop a table or schema definition
    DropSchema { object: String },

    /// DELETE without a scoping predicate
    UnscopedDelete { table: String },

    /// Restore that drops and recreates existing tables
    RestoreOverwrite { table_count: usize },

    /// Read-only export; never destructive
    DataExport,
}

/// Registered patterns of data-destructive behavior.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DangerPattern {
    CascadeTruncate,
    DropSchema,
    UnscopedDelete,
    RestoreOverwrite,
}

impl DangerPattern {
    /// The exact phrase an operator must supply to approve an
    /// operation matching this pattern against `target`.
    pub fn confirmation_phrase(&self, target: &str) -> String {
        match self {
            DangerPattern::CascadeTruncate | DangerPattern::RestoreOverwrite => {
                format!("overwrite all data in {}", target)
            }
            DangerPattern::DropSchema => format!("drop schema objects in {}", target),
            DangerPattern::UnscopedDelete => format!("delete unscoped rows in {}", target),
        }
    }
}

impl fmt::Display for DangerPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DangerPattern::CascadeTruncate => "cascade_truncate",
            DangerPattern::DropSchema => "drop_schema",
            DangerPattern::UnscopedDelete => "unscoped_delete",
            DangerPattern::RestoreOverwrite => "restore_overwrite",
        };
        f.write_str(s)
    }
}

impl OperationKind {
    /// Match against the destructive-pattern registry. `None` means
    /// the operation needs no approval gate.
    pub fn classify(&self) -> Option<DangerPattern> {
        match self {
            OperationKind::CascadeTruncate { .. } => Some(DangerPattern::CascadeTruncate),
            OperationKind::DropSchema { .. } => Some(DangerPattern::DropSchema),
            OperationKind::UnscopedDelete { .. } => Some(DangerPattern::UnscopedDelete),
            OperationKind::RestoreOverwrite { .. } => Some(DangerPattern::RestoreOverwrite),
            OperationKind::DataExport => None,
        }
    }

    /// Short human-readable description for audit entries.
    pub fn describe(&self) -> String {
        match self {
            OperationKind::CascadeTruncate { table_count } => {
                format!("cascade truncate of {} tables", table_count)
            }
            OperationKind::DropSchema { object } => format!("drop of {}", object),
            OperationKind::UnscopedDelete { table } => {
                format!("unscoped delete from {}", table)
            }
            OperationKind::RestoreOverwrite { table_count } => {
                format!("destructive restore over {} tables", table_count)
            }
            OperationKind::DataExport => "data export".to_string(),
        }
    }
}
