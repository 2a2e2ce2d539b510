//! Port trait definitions (Hexagonal Architecture)
//!
//! - EventRepository: producer-side access to the durable event queue
//!
//! The scheduler itself works against transaction-scoped queries in the
//! storage adapter, since each of its sweeps must run in one transaction.

pub mod event_repository;

pub use event_repository::EventRepository;
