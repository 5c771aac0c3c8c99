//! Restore engine and backup validation.
//!
//! Applies backup artifacts to a target endpoint with idempotent
//! drop-if-exists semantics, verifies row counts afterwards, rolls
//! back to a safety backup when a destructive operation fails past its
//! point of no return, and proves artifacts restorable via ephemeral
//! test restores.

pub mod engine;
pub mod validator;

pub use engine::{RestoreEngine, TableVerification, ValidationResult, VerificationReport};
pub use validator::{TestReport, Validator};
