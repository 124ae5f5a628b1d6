//! Infrastructure layer for Arbor.
//!
//! Contains implementations of the ports defined in `arbor-core`: the SQLite
//! state store, the filesystem workflow catalog, and the `arbor.toml` loader.

pub mod catalog;
pub mod config;
pub mod sqlite;
