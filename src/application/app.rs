use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::adapters::net::{ConnectionRegistry, Server};
use crate::adapters::sqlite::{open_store, PoolConfig, SqliteEventRepository};
use crate::domain::models::Config;
use crate::services::{CommandForwarder, EventScheduler, HandlerRegistry};

/// A configured but not yet running server process.
pub struct Application {
    config: Config,
    pool: SqlitePool,
    handlers: HandlerRegistry,
}

impl Application {
    /// Open the event store and register the built-in handlers.
    pub async fn setup(config: Config) -> Result<Self> {
        let pool = open_store(&config.database.url, &PoolConfig::from(&config.database))
            .await
            .with_context(|| format!("Failed to open event store at {}", config.database.url))?;

        Ok(Self { config, pool, handlers: HandlerRegistry::with_connection_handlers() })
    }

    /// Replace the handler registry.
    #[must_use]
    pub fn with_handlers(mut self, handlers: HandlerRegistry) -> Self {
        self.handlers = handlers;
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Start everything and run until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let running = self.start().await?;
        shutdown.cancelled().await;
        running.shutdown().await
    }

    /// Start the scheduler, the forwarder and the listener, in that order.
    ///
    /// Non-persistent rows are purged before the listener accepts anyone.
    pub async fn start(self) -> Result<RunningApplication> {
        let stop = CancellationToken::new();

        let scheduler = EventScheduler::new(self.pool.clone(), Arc::new(self.handlers), self.config.scheduler.clone());
        let scheduler = scheduler.start(stop.clone()).await.context("Failed to start event scheduler")?;

        let (notices_tx, notices_rx) = mpsc::unbounded_channel();
        let registry = ConnectionRegistry::with_notifier(notices_tx);
        let repo = Arc::new(SqliteEventRepository::new(self.pool.clone()));
        let forwarder = tokio::spawn(CommandForwarder::new(repo, registry.clone(), notices_rx).run(stop.clone()));

        let mut server = Server::new(self.config.server.clone(), registry.clone());
        let local_addr = match server.start().await {
            Ok(addr) => addr,
            Err(e) => {
                stop.cancel();
                let _ = tokio::join!(scheduler, forwarder);
                return Err(e).context("Failed to start listener");
            }
        };

        info!(%local_addr, "dbat server running");
        Ok(RunningApplication { local_addr, pool: self.pool, server, registry, stop, scheduler, forwarder })
    }
}

/// Handles to the tasks of a started [`Application`].
pub struct RunningApplication {
    local_addr: SocketAddr,
    pool: SqlitePool,
    server: Server,
    registry: ConnectionRegistry,
    stop: CancellationToken,
    scheduler: JoinHandle<()>,
    forwarder: JoinHandle<()>,
}

impl RunningApplication {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Stop accepting, close open connections, stop the scheduler (which
    /// cancels in-flight events) and the forwarder, then close the pool.
    pub async fn shutdown(mut self) -> Result<()> {
        info!("shutting down");
        self.server.stop().await;

        let closing = self.registry.close_all().await;
        if closing > 0 {
            info!(connections = closing, "closing open connections");
        }

        self.stop.cancel();
        if let Err(e) = self.scheduler.await {
            warn!(error = %e, "event scheduler task did not exit cleanly");
        }
        if let Err(e) = self.forwarder.await {
            warn!(error = %e, "command forwarder task did not exit cleanly");
        }

        self.pool.close().await;
        info!("shutdown complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{DatabaseConfig, ServerConfig};
    use tempfile::TempDir;

    fn test_config(dir: &TempDir) -> Config {
        Config {
            server: ServerConfig { host: "127.0.0.1".to_string(), port: 0 },
            database: DatabaseConfig {
                url: format!("sqlite:{}", dir.path().join("app.db").display()),
                max_connections: 5,
            },
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let app = Application::setup(test_config(&dir)).await.unwrap();
        assert!(dir.path().join("app.db").exists());

        let running = app.start().await.unwrap();
        assert_ne!(running.local_addr().port(), 0);
        running.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_run_returns_after_shutdown_token() {
        let dir = tempfile::tempdir().unwrap();
        let app = Application::setup(test_config(&dir)).await.unwrap();

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(app.run(shutdown.clone()));
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        shutdown.cancel();

        tokio::time::timeout(std::time::Duration::from_secs(5), task).await.unwrap().unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_bind_failure_stops_background_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut config = test_config(&dir);
        config.server.port = taken.local_addr().unwrap().port();

        let app = Application::setup(config).await.unwrap();
        assert!(app.start().await.is_err());
    }
}
