//! Storage infrastructure: configuration file persistence.
//!
//! The `config` sub-module reads and writes the TOML configuration file and
//! exposes the `[permissions]` table as a capability oracle.  Message history
//! is never stored.

pub mod config;
