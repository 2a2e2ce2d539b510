//! Domain errors for the DBAT server core.

use thiserror::Error;

/// Failures of the event store as seen by producers and the scheduler.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Unknown event state: {0}")]
    UnknownState(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

pub type DomainResult<T> = Result<T, DomainError>;

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        DomainError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}
