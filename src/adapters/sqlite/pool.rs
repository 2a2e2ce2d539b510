//! Pool setup for the SQLite event store.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use thiserror::Error;

use crate::domain::models::DatabaseConfig;

const MEMORY_URL: &str = "sqlite::memory:";

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("Invalid database URL: {0}")]
    InvalidUrl(String),
    #[error("Failed to create database directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to open database: {0}")]
    Open(#[source] sqlx::Error),
    #[error("Database did not answer: {0}")]
    Ping(#[source] sqlx::Error),
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    /// How long a writer waits on a locked database before giving up.
    pub busy_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 5,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(3),
            busy_timeout: Duration::from_secs(5),
        }
    }
}

impl From<&DatabaseConfig> for PoolConfig {
    fn from(config: &DatabaseConfig) -> Self {
        Self { max_connections: config.max_connections, ..Self::default() }
    }
}

/// Open a WAL-mode pool on `database_url`, creating the file and its
/// directory when missing.
pub async fn create_pool(database_url: &str, config: &PoolConfig) -> Result<SqlitePool, PoolError> {
    if let Some(dir) = database_path(database_url).as_ref().and_then(|path| path.parent()) {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)
                .map_err(|source| PoolError::CreateDirectory { path: dir.to_path_buf(), source })?;
        }
    }

    let options = SqliteConnectOptions::from_str(database_url)
        .map_err(|_| PoolError::InvalidUrl(database_url.to_string()))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(config.busy_timeout);

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.acquire_timeout)
        .connect_with(options)
        .await
        .map_err(PoolError::Open)?;

    tracing::debug!(url = %database_url, max_connections = config.max_connections, "event store pool ready");
    Ok(pool)
}

/// Single-connection in-memory pool for tests.
///
/// Every connection to `sqlite::memory:` is a separate database, so the
/// pool holds exactly one and never lets it expire.
pub async fn create_test_pool() -> Result<SqlitePool, PoolError> {
    let options =
        SqliteConnectOptions::from_str(MEMORY_URL).map_err(|_| PoolError::InvalidUrl(MEMORY_URL.to_string()))?;

    SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
        .map_err(PoolError::Open)
}

pub async fn ping(pool: &SqlitePool) -> Result<(), PoolError> {
    sqlx::query("SELECT 1").execute(pool).await.map_err(PoolError::Ping)?;
    Ok(())
}

/// File path named by a `sqlite:` URL; `None` for in-memory databases.
fn database_path(database_url: &str) -> Option<PathBuf> {
    let rest = database_url.strip_prefix("sqlite:")?;
    let rest = rest.strip_prefix("//").unwrap_or(rest);
    let path = rest.split('?').next().unwrap_or_default();

    match path {
        "" | ":memory:" => None,
        path => Some(PathBuf::from(path)),
    }
}
