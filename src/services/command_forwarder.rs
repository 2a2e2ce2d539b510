//! Turns connection lifecycle notices into ephemeral event rows.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::connection_handlers::{ClientConnected, ClientDisconnected, ClientSubmittedCommand, ConnectionEvent};
use crate::adapters::net::{ConnectionNotice, ConnectionRegistry};
use crate::domain::errors::DomainResult;
use crate::domain::models::Event;
use crate::domain::ports::EventRepository;

/// Feeds the event store from the connection registry.
///
/// Every row it writes is non-persistent: connection-scoped events do not
/// survive a restart.
pub struct CommandForwarder<R: EventRepository> {
    repo: Arc<R>,
    registry: ConnectionRegistry,
    notices: mpsc::UnboundedReceiver<ConnectionNotice>,
}

impl<R: EventRepository + 'static> CommandForwarder<R> {
    pub fn new(repo: Arc<R>, registry: ConnectionRegistry, notices: mpsc::UnboundedReceiver<ConnectionNotice>) -> Self {
        Self { repo, registry, notices }
    }

    /// Forward notices until `shutdown` is cancelled or every sender is gone.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!("command forwarder started");
        loop {
            let notice = tokio::select! {
                () = shutdown.cancelled() => break,
                notice = self.notices.recv() => notice,
            };
            let Some(notice) = notice else { break };

            if let Err(e) = self.forward(notice).await {
                error!(error = %e, "failed to enqueue connection event");
            }
        }
        info!("command forwarder stopped");
    }

    /// Write the event rows for one notice. Returns how many were written.
    pub async fn forward(&self, notice: ConnectionNotice) -> DomainResult<usize> {
        match notice {
            ConnectionNotice::Connected { conn_id, peer } => {
                self.enqueue(&ClientConnected { conn_id, peer: peer.map(|addr| addr.to_string()) }).await?;
                Ok(1)
            }
            ConnectionNotice::InputPending { .. } => {
                let mut written = 0;
                for (conn_id, lines) in self.registry.take_pending_commands().await {
                    for command in lines {
                        self.enqueue(&ClientSubmittedCommand { conn_id, command }).await?;
                        written += 1;
                    }
                }
                Ok(written)
            }
            ConnectionNotice::Disconnected { conn_id, closed_by_client, .. } => {
                self.enqueue(&ClientDisconnected { conn_id, closed_by_client }).await?;
                Ok(1)
            }
        }
    }

    async fn enqueue<P: ConnectionEvent>(&self, payload: &P) -> DomainResult<()> {
        let event = Event::new(P::NAME, serde_json::to_value(payload)?);
        self.repo.create(&event).await?;
        debug!(event_id = %event.id, event_name = P::NAME, conn_id = %payload.conn_id(), "enqueued connection event");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::net::Connection;
    use crate::adapters::sqlite::{create_migrated_test_pool, SqliteEventRepository};
    use serde_json::json;
    use uuid::Uuid;

    async fn setup() -> (CommandForwarder<SqliteEventRepository>, Arc<SqliteEventRepository>, ConnectionRegistry) {
        let repo = Arc::new(SqliteEventRepository::new(create_migrated_test_pool().await.unwrap()));
        let (_tx, rx) = mpsc::unbounded_channel();
        let registry = ConnectionRegistry::new();
        (CommandForwarder::new(repo.clone(), registry.clone(), rx), repo, registry)
    }

    #[tokio::test]
    async fn test_connected_and_disconnected_rows() {
        let (forwarder, repo, _registry) = setup().await;
        let conn_id = Uuid::new_v4();

        forwarder.forward(ConnectionNotice::Connected { conn_id, peer: None }).await.unwrap();
        forwarder
            .forward(ConnectionNotice::Disconnected { conn_id, closed_by_client: true, closed_by_server: false })
            .await
            .unwrap();

        let events = repo.list(None).await.unwrap();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| !e.persistent));
        let disconnected = events.iter().find(|e| e.name == ClientDisconnected::NAME).unwrap();
        assert_eq!(disconnected.parameters, json!({"conn_id": conn_id, "closed_by_client": true}));
    }

    #[tokio::test]
    async fn test_pending_lines_become_one_row_each() {
        let (forwarder, repo, registry) = setup().await;
        let conn = Connection::new(Uuid::new_v4(), None, registry.clone());
        let handle = conn.handle();
        registry.register(handle.clone()).await;

        handle.push_line("look".to_string()).await;
        handle.push_line("north".to_string()).await;
        registry.mark_pending(handle.id()).await;

        let written = forwarder.forward(ConnectionNotice::InputPending { conn_id: handle.id() }).await.unwrap();
        assert_eq!(written, 2);

        let mut commands: Vec<String> = repo
            .list(None)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.parameters["command"].as_str().unwrap().to_string())
            .collect();
        commands.sort();
        assert_eq!(commands, vec!["look", "north"]);

        // Already drained.
        assert_eq!(forwarder.forward(ConnectionNotice::InputPending { conn_id: handle.id() }).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let repo = Arc::new(SqliteEventRepository::new(create_migrated_test_pool().await.unwrap()));
        let (tx, rx) = mpsc::unbounded_channel();
        let forwarder = CommandForwarder::new(repo.clone(), ConnectionRegistry::new(), rx);

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(forwarder.run(shutdown.clone()));
        tx.send(ConnectionNotice::Connected { conn_id: Uuid::new_v4(), peer: None }).unwrap();

        for _ in 0..100 {
            if !repo.list(None).await.unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        shutdown.cancel();
        task.await.unwrap();

        assert_eq!(repo.list(None).await.unwrap().len(), 1);
    }
}
