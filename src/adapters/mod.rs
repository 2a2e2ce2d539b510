//! Infrastructure adapters for external systems.

pub mod net;
pub mod sqlite;
