//! SQLite implementation of the EventRepository, plus the
//! transaction-scoped queries the scheduler issues.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Event, EventState};
use crate::domain::ports::EventRepository;

/// SQLite caps bound parameters per statement; stay well below it.
const MAX_BINDS_PER_STATEMENT: usize = 500;

/// SQLite-backed event repository.
#[derive(Clone)]
pub struct SqliteEventRepository {
    pool: SqlitePool,
}

impl SqliteEventRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl EventRepository for SqliteEventRepository {
    async fn create(&self, event: &Event) -> DomainResult<()> {
        let parameters = serde_json::to_string(&event.parameters)?;

        sqlx::query(
            r#"INSERT INTO events (id, event_name, parameters, current_state, persistent, created_at)
               VALUES (?, ?, ?, ?, ?, ?)"#,
        )
        .bind(event.id.to_string())
        .bind(&event.name)
        .bind(parameters)
        .bind(event.state.as_str())
        .bind(event.persistent)
        .bind(event.created_at.to_rfc3339_opts(SecondsFormat::Micros, true))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<Event>> {
        let row: Option<EventRow> = sqlx::query_as("SELECT * FROM events WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Event::try_from).transpose()
    }

    async fn list(&self, state: Option<EventState>) -> DomainResult<Vec<Event>> {
        let rows: Vec<EventRow> = match state {
            Some(state) => {
                sqlx::query_as("SELECT * FROM events WHERE current_state = ? ORDER BY created_at")
                    .bind(state.as_str())
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query_as("SELECT * FROM events ORDER BY created_at")
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        rows.into_iter().map(Event::try_from).collect()
    }

    async fn request_abort(&self, id: Uuid) -> DomainResult<bool> {
        transition(&self.pool, id, EventState::Aborted).await
    }

    async fn count_by_state(&self) -> DomainResult<HashMap<EventState, u64>> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT current_state, COUNT(*) FROM events GROUP BY current_state")
                .fetch_all(&self.pool)
                .await?;

        let mut counts = HashMap::new();
        for (state, count) in rows {
            let state = EventState::from_str(&state).ok_or(DomainError::UnknownState(state))?;
            counts.insert(state, u64::try_from(count).unwrap_or_default());
        }
        Ok(counts)
    }
}

/// Parse the text `id` column.
pub fn parse_event_id(id: &str) -> DomainResult<Uuid> {
    Uuid::parse_str(id).map_err(|e| DomainError::SerializationError(format!("event id {id:?}: {e}")))
}

/// Raw row from the `events` table.
#[derive(Debug, sqlx::FromRow)]
pub struct EventRow {
    pub id: String,
    pub event_name: String,
    pub parameters: String,
    pub current_state: String,
    pub persistent: bool,
    pub created_at: String,
}

impl TryFrom<EventRow> for Event {
    type Error = DomainError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        let state = EventState::from_str(&row.current_state)
            .ok_or_else(|| DomainError::UnknownState(row.current_state.clone()))?;

        Ok(Event {
            id: parse_event_id(&row.id)?,
            name: row.event_name,
            parameters: serde_json::from_str(&row.parameters)?,
            state,
            persistent: row.persistent,
            created_at: DateTime::parse_from_rfc3339(&row.created_at)
                .map_err(|e| DomainError::SerializationError(format!("created_at {:?}: {e}", row.created_at)))?
                .with_timezone(&Utc),
        })
    }
}

/// Select every row whose state is in `states`, oldest first.
pub async fn select_by_states(conn: &mut SqliteConnection, states: &[EventState]) -> DomainResult<Vec<EventRow>> {
    if states.is_empty() {
        return Ok(Vec::new());
    }

    let mut query = QueryBuilder::<Sqlite>::new("SELECT * FROM events WHERE current_state IN (");
    let mut separated = query.separated(", ");
    for state in states {
        separated.push_bind(state.as_str());
    }
    separated.push_unseparated(") ORDER BY created_at");

    Ok(query.build_query_as::<EventRow>().fetch_all(&mut *conn).await?)
}

/// Delete the rows with the given ids. Returns the number deleted.
pub async fn delete_by_ids(conn: &mut SqliteConnection, ids: &[String]) -> DomainResult<u64> {
    let mut deleted = 0;
    for chunk in ids.chunks(MAX_BINDS_PER_STATEMENT) {
        let mut query = QueryBuilder::<Sqlite>::new("DELETE FROM events WHERE id IN (");
        let mut separated = query.separated(", ");
        for id in chunk {
            separated.push_bind(id.as_str());
        }
        separated.push_unseparated(")");

        deleted += query.build().execute(&mut *conn).await?.rows_affected();
    }
    Ok(deleted)
}

/// Move the rows with the given ids to `state`. Returns the number updated.
pub async fn update_state_by_ids(
    conn: &mut SqliteConnection,
    ids: &[String],
    state: EventState,
) -> DomainResult<u64> {
    let mut updated = 0;
    for chunk in ids.chunks(MAX_BINDS_PER_STATEMENT) {
        let mut query = QueryBuilder::<Sqlite>::new("UPDATE events SET current_state = ");
        query.push_bind(state.as_str());
        query.push(" WHERE id IN (");
        let mut separated = query.separated(", ");
        for id in chunk {
            separated.push_bind(id.as_str());
        }
        separated.push_unseparated(")");

        updated += query.build().execute(&mut *conn).await?.rows_affected();
    }
    Ok(updated)
}

/// Delete every non-persistent row regardless of state.
pub async fn delete_non_persistent(conn: &mut SqliteConnection) -> DomainResult<u64> {
    let result = sqlx::query("DELETE FROM events WHERE persistent = 0")
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

/// Record a handler's outcome. Only rows still owned by a handler
/// (`active`, or `aborted` while the handler winds down) are touched.
pub async fn record_outcome(pool: &SqlitePool, id: Uuid, state: EventState) -> DomainResult<bool> {
    transition(pool, id, state).await
}

/// Move one row to `target` if its current state allows it. Returns
/// whether the row changed.
async fn transition(pool: &SqlitePool, id: Uuid, target: EventState) -> DomainResult<bool> {
    let sources = EventState::sources_of(target);
    if sources.is_empty() {
        return Ok(false);
    }

    let mut query = QueryBuilder::<Sqlite>::new("UPDATE events SET current_state = ");
    query.push_bind(target.as_str());
    query.push(" WHERE id = ");
    query.push_bind(id.to_string());
    query.push(" AND current_state IN (");
    let mut separated = query.separated(", ");
    for state in sources {
        separated.push_bind(state.as_str());
    }
    separated.push_unseparated(")");

    Ok(query.build().execute(pool).await?.rows_affected() == 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::create_migrated_test_pool;
    use serde_json::json;

    async fn setup_test_repo() -> SqliteEventRepository {
        SqliteEventRepository::new(create_migrated_test_pool().await.unwrap())
    }

    #[tokio::test]
    async fn test_create_and_get_event() {
        let repo = setup_test_repo().await;
        let event = Event::new("ClientConnected", json!({"conn_id": "abc"})).persistent();

        repo.create(&event).await.unwrap();

        let stored = repo.get(event.id).await.unwrap().unwrap();
        assert_eq!(stored.name, "ClientConnected");
        assert_eq!(stored.parameters, json!({"conn_id": "abc"}));
        assert_eq!(stored.state, EventState::Pending);
        assert!(stored.persistent);
    }

    #[tokio::test]
    async fn test_request_abort_only_for_live_rows() {
        let repo = setup_test_repo().await;
        let pending = Event::new("A", json!({}));
        let finished = Event::new("B", json!({})).with_state(EventState::Finished);
        repo.create(&pending).await.unwrap();
        repo.create(&finished).await.unwrap();

        assert!(repo.request_abort(pending.id).await.unwrap());
        assert!(!repo.request_abort(finished.id).await.unwrap());
        assert!(!repo.request_abort(Uuid::new_v4()).await.unwrap());

        let aborted = repo.get(pending.id).await.unwrap().unwrap();
        assert_eq!(aborted.state, EventState::Aborted);
    }

    #[tokio::test]
    async fn test_bulk_queries_in_one_transaction() {
        let repo = setup_test_repo().await;
        let a = Event::new("A", json!({}));
        let b = Event::new("B", json!({}));
        let c = Event::new("C", json!({})).with_state(EventState::Error);
        for event in [&a, &b, &c] {
            repo.create(event).await.unwrap();
        }

        let mut tx = repo.pool().begin().await.unwrap();
        let pending = select_by_states(&mut tx, &[EventState::Pending]).await.unwrap();
        assert_eq!(pending.len(), 2);

        let updated = update_state_by_ids(&mut tx, &[a.id.to_string()], EventState::Active).await.unwrap();
        assert_eq!(updated, 1);
        let deleted = delete_by_ids(&mut tx, &[b.id.to_string(), c.id.to_string()]).await.unwrap();
        assert_eq!(deleted, 2);
        tx.commit().await.unwrap();

        let remaining = repo.list(None).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].state, EventState::Active);
    }

    #[tokio::test]
    async fn test_empty_id_lists_are_no_ops() {
        let repo = setup_test_repo().await;
        let mut conn = repo.pool().acquire().await.unwrap();
        assert_eq!(delete_by_ids(&mut conn, &[]).await.unwrap(), 0);
        assert_eq!(update_state_by_ids(&mut conn, &[], EventState::Active).await.unwrap(), 0);
        assert!(select_by_states(&mut conn, &[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_record_outcome_only_touches_owned_rows() {
        let repo = setup_test_repo().await;
        let active = Event::new("A", json!({})).with_state(EventState::Active);
        let pending = Event::new("B", json!({}));
        repo.create(&active).await.unwrap();
        repo.create(&pending).await.unwrap();

        assert!(record_outcome(repo.pool(), active.id, EventState::Finished).await.unwrap());
        assert!(!record_outcome(repo.pool(), pending.id, EventState::Finished).await.unwrap());

        let counts = repo.count_by_state().await.unwrap();
        assert_eq!(counts.get(&EventState::Finished), Some(&1));
        assert_eq!(counts.get(&EventState::Pending), Some(&1));
    }

    #[tokio::test]
    async fn test_conditional_updates_follow_state_machine() {
        let repo = setup_test_repo().await;
        let aborted = Event::new("A", json!({})).with_state(EventState::Aborted);
        let finished = Event::new("B", json!({})).with_state(EventState::Finished);
        let pending = Event::new("C", json!({}));
        for event in [&aborted, &finished, &pending] {
            repo.create(event).await.unwrap();
        }

        assert!(record_outcome(repo.pool(), aborted.id, EventState::Cancelled).await.unwrap());
        assert!(!record_outcome(repo.pool(), finished.id, EventState::Error).await.unwrap());
        assert!(!record_outcome(repo.pool(), pending.id, EventState::Pending).await.unwrap());
        assert!(!repo.request_abort(finished.id).await.unwrap());
        assert!(repo.request_abort(pending.id).await.unwrap());

        assert_eq!(repo.get(aborted.id).await.unwrap().unwrap().state, EventState::Cancelled);
        assert_eq!(repo.get(finished.id).await.unwrap().unwrap().state, EventState::Finished);
        assert_eq!(repo.get(pending.id).await.unwrap().unwrap().state, EventState::Aborted);
    }

    #[tokio::test]
    async fn test_delete_non_persistent() {
        let repo = setup_test_repo().await;
        repo.create(&Event::new("A", json!({}))).await.unwrap();
        repo.create(&Event::new("B", json!({})).with_state(EventState::Active)).await.unwrap();
        let kept = Event::new("C", json!({})).persistent().with_state(EventState::Active);
        repo.create(&kept).await.unwrap();

        let mut conn = repo.pool().acquire().await.unwrap();
        assert_eq!(delete_non_persistent(&mut conn).await.unwrap(), 2);
        drop(conn);

        let remaining = repo.list(None).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, kept.id);
        assert_eq!(remaining[0].state, EventState::Active);
    }
}
