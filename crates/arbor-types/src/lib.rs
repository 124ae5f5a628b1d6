//! Shared domain types for Arbor.
//!
//! This crate contains the workflow schema model, session result types,
//! engine configuration, and the process-wide constant table.
//!
//! Zero infrastructure dependencies -- only serde, schemars, thiserror.

pub mod config;
pub mod constants;
pub mod error;
pub mod session;
pub mod workflow;
