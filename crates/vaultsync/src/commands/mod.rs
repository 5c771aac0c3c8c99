//! Command implementations

pub mod audit;
pub mod backup;
pub mod config;
pub mod history;
pub mod restore;
pub mod sync;
pub mod validate;
