//! DBAT - runtime core of a multiplayer game server
//!
//! DBAT accepts line-oriented TCP clients and drives game logic through a
//! durable, SQLite-backed event queue. Every client action becomes an event
//! row; a scheduler claims pending rows, runs their handlers inside a
//! transaction, records the outcome, and cleans up.
//!
//! # Architecture
//!
//! This crate follows Hexagonal Architecture principles:
//!
//! - **Domain Layer** (`domain`): Event model, configuration, port traits
//! - **Adapters** (`adapters`): SQLite event store and the TCP line protocol
//! - **Service Layer** (`services`): Event scheduler, handlers, command forwarding
//! - **Application Layer** (`application`): Process wiring and graceful shutdown
//! - **Infrastructure Layer** (`infrastructure`): Configuration loading and logging
//! - **CLI Layer** (`cli`): Command-line interface
//!
//! # Example
//!
//! ```ignore
//! use dbat::application::Application;
//! use dbat::domain::models::Config;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let app = Application::setup(Config::default()).await?;
//!     app.run(CancellationToken::new()).await
//! }
//! ```

pub mod adapters;
pub mod application;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use application::{Application, RunningApplication};
pub use domain::models::{
    Config, DatabaseConfig, Event, EventOutcome, EventState, LoggingConfig, SchedulerConfig,
    ServerConfig,
};
pub use domain::ports::EventRepository;
pub use domain::{DomainError, DomainResult};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{EventContext, EventError, EventHandler, EventScheduler, HandlerRegistry};
