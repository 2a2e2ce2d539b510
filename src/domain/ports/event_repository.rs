use std::collections::HashMap;

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{Event, EventState};

/// Repository port for event persistence operations
#[async_trait]
pub trait EventRepository: Send + Sync {
    /// Insert a new event row
    async fn create(&self, event: &Event) -> DomainResult<()>;

    /// Get an event by ID
    async fn get(&self, id: Uuid) -> DomainResult<Option<Event>>;

    /// List events, oldest first, optionally filtered by state
    async fn list(&self, state: Option<EventState>) -> DomainResult<Vec<Event>>;

    /// Ask the scheduler to cancel a pending or active event.
    ///
    /// Returns `false` when no such row exists or it is already past the
    /// point where an abort means anything.
    async fn request_abort(&self, id: Uuid) -> DomainResult<bool>;

    /// Count rows per state
    async fn count_by_state(&self) -> DomainResult<HashMap<EventState, u64>>;
}
