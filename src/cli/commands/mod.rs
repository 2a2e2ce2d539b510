//! CLI command implementations.

pub mod event;
pub mod serve;
