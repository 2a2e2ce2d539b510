//! TCP listener that turns accepted sockets into registered connections.

use std::net::SocketAddr;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::connection::Connection;
use super::registry::ConnectionRegistry;
use crate::domain::models::ServerConfig;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to read local address: {0}")]
    LocalAddr(#[source] std::io::Error),
    #[error("Server is already running")]
    AlreadyStarted,
}

pub struct Server {
    config: ServerConfig,
    registry: ConnectionRegistry,
    shutdown: CancellationToken,
    accept_loop: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

impl Server {
    pub fn new(config: ServerConfig, registry: ConnectionRegistry) -> Self {
        Self { config, registry, shutdown: CancellationToken::new(), accept_loop: None, local_addr: None }
    }

    /// Bind the listener and start accepting in the background.
    ///
    /// Returns the bound address, which differs from the configured one
    /// when port 0 was requested.
    pub async fn start(&mut self) -> Result<SocketAddr, ServerError> {
        if self.accept_loop.is_some() {
            return Err(ServerError::AlreadyStarted);
        }

        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind((self.config.host.as_str(), self.config.port))
            .await
            .map_err(|source| ServerError::Bind { addr: addr.clone(), source })?;
        let local_addr = listener.local_addr().map_err(ServerError::LocalAddr)?;

        info!(%local_addr, "listening for connections");
        self.accept_loop = Some(tokio::spawn(accept_loop(listener, self.registry.clone(), self.shutdown.clone())));
        self.local_addr = Some(local_addr);
        Ok(local_addr)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Close the listener and wait for the accept loop to exit.
    ///
    /// Connections already accepted keep running; see
    /// [`ConnectionRegistry::close_all`].
    pub async fn stop(&mut self) {
        self.shutdown.cancel();
        if let Some(accept_loop) = self.accept_loop.take() {
            if let Err(e) = accept_loop.await {
                warn!(error = %e, "accept loop did not exit cleanly");
            }
        }
        info!("server stopped");
    }
}

async fn accept_loop(listener: TcpListener, registry: ConnectionRegistry, shutdown: CancellationToken) {
    loop {
        let accepted = tokio::select! {
            () = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        let (stream, peer) = match accepted {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "failed to accept connection");
                continue;
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            warn!(error = %e, %peer, "failed to set TCP_NODELAY");
        }

        let conn_id = Uuid::new_v4();
        info!(%conn_id, %peer, "accepted connection");

        let connection = Connection::new(conn_id, Some(peer), registry.clone());
        registry.register(connection.handle()).await;
        // Connections outlive the accept loop; they end on their own.
        drop(connection.start(stream));
    }
    debug!("accept loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpStream;

    fn loopback() -> ServerConfig {
        ServerConfig { host: "127.0.0.1".to_string(), port: 0 }
    }

    #[tokio::test]
    async fn test_start_returns_ephemeral_port() {
        let mut server = Server::new(loopback(), ConnectionRegistry::new());
        let addr = server.start().await.unwrap();
        assert_ne!(addr.port(), 0);
        assert_eq!(server.local_addr(), Some(addr));

        assert!(matches!(server.start().await, Err(ServerError::AlreadyStarted)));
        server.stop().await;
    }

    #[tokio::test]
    async fn test_bind_failure_is_reported() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = taken.local_addr().unwrap().port();

        let config = ServerConfig { host: "127.0.0.1".to_string(), port };
        let mut server = Server::new(config, ConnectionRegistry::new());
        assert!(matches!(server.start().await, Err(ServerError::Bind { .. })));
    }

    #[tokio::test]
    async fn test_stop_leaves_accepted_connections_running() {
        let registry = ConnectionRegistry::new();
        let mut server = Server::new(loopback(), registry.clone());
        let addr = server.start().await.unwrap();

        let mut client = TcpStream::connect(addr).await.unwrap();
        for _ in 0..100 {
            if registry.live_count().await == 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(registry.live_count().await, 1);

        server.stop().await;
        assert_eq!(registry.live_count().await, 1);
        assert!(TcpStream::connect(addr).await.is_err());

        let conn_id = registry.live_ids().await[0];
        registry.get(conn_id).await.unwrap().send_line("Goodbye").unwrap();
        let mut line = [0u8; 9];
        client.read_exact(&mut line).await.unwrap();
        assert_eq!(&line, b"Goodbye\r\n");

        assert_eq!(registry.close_all().await, 1);
        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }
}
