//! Bidirectional sync pipeline.
//!
//! [`SyncOrchestrator`] drives a full truncate-and-replace sync from a
//! source database into a target database through eight fixed phases,
//! with a safety backup and explicit approval in front of any mutation
//! and a rollback pass behind any mid-flight failure. [`SyncHistory`]
//! persists every run's [`SyncRecord`]; [`TargetLease`] serializes
//! concurrent syncs against the same target.

pub mod history;
pub mod lease;
pub mod orchestrator;
pub mod record;

pub use history::SyncHistory;
pub use lease::TargetLease;
pub use orchestrator::{CancelFlag, SyncOrchestrator, SyncPlan};
pub use record::{SyncPhase, SyncRecord, SyncStatus, TableProgress};
