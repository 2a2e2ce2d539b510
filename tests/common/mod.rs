//! Common test utilities for integration tests
//!
//! Provides shared fixtures and helpers used across multiple integration
//! test files.

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use dbat::adapters::sqlite::{open_store, PoolConfig};
use dbat::domain::models::{Config, DatabaseConfig, SchedulerConfig, ServerConfig};
use sqlx::SqlitePool;
use tempfile::TempDir;

/// Create a temporary test database path
///
/// Returns the directory (for lifetime management) and the `sqlite:` URL.
pub fn temp_db() -> (TempDir, String) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path: PathBuf = dir.path().join("test.db");
    (dir, format!("sqlite:{}", path.display()))
}

/// Open a migrated pool on `url`.
#[allow(dead_code)]
pub async fn open_pool(url: &str) -> SqlitePool {
    open_store(url, &PoolConfig::default()).await.expect("Failed to open test database")
}

/// Config bound to an ephemeral local port with a fast scheduler tick.
#[allow(dead_code)]
pub fn test_config(database_url: &str) -> Config {
    Config {
        server: ServerConfig { host: "127.0.0.1".to_string(), port: 0 },
        database: DatabaseConfig { url: database_url.to_string(), max_connections: 5 },
        scheduler: SchedulerConfig { tick_interval_ms: 20, shutdown_grace_ms: 1000 },
        ..Config::default()
    }
}

/// Setup test logging
///
/// Initializes tracing subscriber for test output.
/// Call this at the beginning of tests that need logging.
#[allow(dead_code)]
pub fn setup_test_logging() {
    use tracing_subscriber::fmt;

    let _ = fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Wait for an async condition to become true
///
/// Polls the predicate every 20ms until it returns true or `timeout_ms`
/// elapses. Returns whether the condition was met.
#[allow(dead_code)]
pub async fn wait_for<F, Fut>(mut predicate: F, timeout_ms: u64) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);

    while tokio::time::Instant::now() < deadline {
        if predicate().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    predicate().await
}
