//! Domain layer for the DBAT game server core
//!
//! This module contains the event model, configuration types, errors, and
//! the port traits the storage adapters implement.

pub mod errors;
pub mod models;
pub mod ports;

// Re-export error types for convenient access
pub use errors::{DomainError, DomainResult};
