//! Backup artifact creation and management.
//!
//! This crate produces point-in-time exports of the managed tables
//! (gzip-compressed SQL with a JSON manifest sidecar) and manages them
//! on durable storage: integrity verification, freshness queries, and
//! retention rotation.
//!
//! # Invariants
//!
//! - An artifact is never considered valid before its streaming
//!   integrity check passes and its size clears the plausibility floor.
//! - Artifacts are immutable once created; only retention deletes
//!   them, and never one pinned by an in-flight safety-gate decision.
//! - A failed export never leaves a half-written artifact behind.

pub mod artifact;
pub mod compression;
pub mod dump;
pub mod store;

pub use artifact::{BackupArtifact, ChecksumInfo, IntegrityStatus, MANIFEST_SUFFIX, MANIFEST_VERSION};
pub use compression::{calculate_checksum, compress_file, gzip_readable, DEFAULT_COMPRESSION_LEVEL};
pub use dump::DumpEngine;
pub use store::ArtifactStore;
