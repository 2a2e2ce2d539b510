//! Logging infrastructure
//!
//! Structured logging using tracing and tracing-subscriber:
//! - pretty or JSON console output
//! - optional JSON log files with rotation

pub mod logger;

pub use logger::LoggerImpl;
