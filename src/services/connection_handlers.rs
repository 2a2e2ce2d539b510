//! Built-in handlers for connection lifecycle events.
//!
//! Each one decodes its parameters in `validate` and records the
//! association between the connection and the payload in `run`.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::SqliteConnection;
use uuid::Uuid;

use super::event_handler::{EventContext, EventError, EventHandler};

/// Parameter payload of a connection lifecycle event.
pub trait ConnectionEvent: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Event name the payload is stored under.
    const NAME: &'static str;

    fn conn_id(&self) -> Uuid;

    fn record(&self, event_id: Uuid);
}

// ============================================================================
// Payloads
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConnected {
    pub conn_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer: Option<String>,
}

impl ConnectionEvent for ClientConnected {
    const NAME: &'static str = "ClientConnected";

    fn conn_id(&self) -> Uuid {
        self.conn_id
    }

    fn record(&self, event_id: Uuid) {
        tracing::info!(%event_id, conn_id = %self.conn_id, peer = ?self.peer, "client connected");
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSubmittedCommand {
    pub conn_id: Uuid,
    pub command: String,
}

impl ConnectionEvent for ClientSubmittedCommand {
    const NAME: &'static str = "ClientSubmittedCommand";

    fn conn_id(&self) -> Uuid {
        self.conn_id
    }

    fn record(&self, event_id: Uuid) {
        tracing::info!(%event_id, conn_id = %self.conn_id, command = %self.command, "command from client");
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientDisconnected {
    pub conn_id: Uuid,
    #[serde(default)]
    pub closed_by_client: bool,
}

impl ConnectionEvent for ClientDisconnected {
    const NAME: &'static str = "ClientDisconnected";

    fn conn_id(&self) -> Uuid {
        self.conn_id
    }

    fn record(&self, event_id: Uuid) {
        tracing::info!(%event_id, conn_id = %self.conn_id, closed_by_client = self.closed_by_client, "client disconnected");
    }
}

// ============================================================================
// Handler
// ============================================================================

/// Handler shared by every [`ConnectionEvent`] payload.
pub struct ConnectionEventHandler<P> {
    id: Uuid,
    parameters: Value,
    payload: Option<P>,
}

impl<P: ConnectionEvent> ConnectionEventHandler<P> {
    pub fn new(context: EventContext) -> Self {
        Self { id: context.id, parameters: context.parameters, payload: None }
    }

    pub fn factory(context: EventContext) -> Box<dyn EventHandler> {
        Box::new(Self::new(context))
    }

    /// Decoded parameters, once `validate` has succeeded.
    pub fn payload(&self) -> Option<&P> {
        self.payload.as_ref()
    }
}

#[async_trait]
impl<P: ConnectionEvent> EventHandler for ConnectionEventHandler<P> {
    async fn validate(&mut self) -> Result<(), EventError> {
        self.payload = Some(P::deserialize(&self.parameters)?);
        Ok(())
    }

    async fn run(&mut self, _conn: &mut SqliteConnection) -> Result<(), EventError> {
        let payload = self
            .payload
            .as_ref()
            .ok_or_else(|| EventError::Validation(format!("{} parameters were not validated", P::NAME)))?;
        payload.record(self.id);
        Ok(())
    }
}
