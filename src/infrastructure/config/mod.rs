//! Configuration management infrastructure
//!
//! Hierarchical configuration using figment:
//! - programmatic defaults
//! - YAML file loading
//! - `DBAT_*` environment variable overrides
//! - validation

pub mod loader;

pub use loader::{ConfigError, ConfigLoader};
