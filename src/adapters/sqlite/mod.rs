//! SQLite-backed durable event store.

pub mod event_repository;
pub mod migrations;
pub mod pool;

pub use event_repository::{parse_event_id, EventRow, SqliteEventRepository};
pub use migrations::{Migration, MigrationError, Migrator, MIGRATIONS};
pub use pool::{create_pool, create_test_pool, ping, PoolConfig, PoolError};

use sqlx::SqlitePool;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error(transparent)]
    Migration(#[from] MigrationError),
}

/// Open the store at `database_url` and bring its schema up to date.
pub async fn open_store(database_url: &str, config: &PoolConfig) -> Result<SqlitePool, StoreError> {
    let pool = create_pool(database_url, config).await?;
    Migrator::new(pool.clone()).run().await?;
    Ok(pool)
}

/// In-memory store with the schema applied, for tests.
pub async fn create_migrated_test_pool() -> Result<SqlitePool, StoreError> {
    let pool = create_test_pool().await?;
    Migrator::new(pool.clone()).run().await?;
    Ok(pool)
}
