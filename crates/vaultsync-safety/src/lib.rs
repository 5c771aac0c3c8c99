//! Safety gating for destructive database operations.
//!
//! Guarantees the pipeline's core invariant: no destructive operation
//! (restore, cross-environment sync, truncate-and-reload) runs without
//! a verified, restorable backup in force and explicit operator
//! approval. Every decision is durably recorded in an append-only
//! audit ledger.

pub mod audit;
pub mod gate;
pub mod operation;

pub use audit::{AuditEntry, AuditLog, AuditOutcome, DEFAULT_AUDIT_TAIL_LINES};
pub use gate::{ApprovalDecision, ApprovalToken, GateState, OperationGuard, SafetyGate};
pub use operation::{DangerPattern, OperationKind};
