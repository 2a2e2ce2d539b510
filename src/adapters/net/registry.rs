//! Shared live/dead connection registries and the pending-input set.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};

use super::connection::{ConnectionHandle, ConnectionId};

/// Lifecycle notices published by the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionNotice {
    Connected { conn_id: ConnectionId, peer: Option<SocketAddr> },
    /// The connection went from no buffered lines to at least one.
    InputPending { conn_id: ConnectionId },
    Disconnected { conn_id: ConnectionId, closed_by_client: bool, closed_by_server: bool },
}

#[derive(Default)]
struct RegistryState {
    live: HashMap<ConnectionId, ConnectionHandle>,
    dead: HashMap<ConnectionId, ConnectionHandle>,
    pending_input: HashSet<ConnectionId>,
}

/// Process-wide view of every connection the server has accepted.
///
/// An id lives in exactly one of the live or dead maps. Ids are never
/// reused, so the dead map keeps handles around for late readers of
/// buffered input.
///
/// Nothing ever removes an entry from the dead map. Each retired handle
/// keeps its shared state alive (buffered lines and outbound sender), so
/// memory grows with the number of connections accepted over the life of
/// the process.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    state: Arc<RwLock<RegistryState>>,
    notifier: Option<mpsc::UnboundedSender<ConnectionNotice>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry that publishes a [`ConnectionNotice`] for every lifecycle change.
    pub fn with_notifier(notifier: mpsc::UnboundedSender<ConnectionNotice>) -> Self {
        Self { state: Arc::default(), notifier: Some(notifier) }
    }

    pub async fn register(&self, handle: ConnectionHandle) {
        let conn_id = handle.id();
        let peer = handle.peer();
        {
            let mut state = self.state.write().await;
            state.dead.remove(&conn_id);
            state.live.insert(conn_id, handle);
        }
        tracing::debug!(%conn_id, "connection registered");
        self.notify(ConnectionNotice::Connected { conn_id, peer });
    }

    /// Move a connection from the live map to the dead map.
    ///
    /// Returns `false` if the id was not live, in which case nothing changes.
    pub async fn retire(&self, conn_id: ConnectionId) -> bool {
        let handle = {
            let mut state = self.state.write().await;
            let Some(handle) = state.live.remove(&conn_id) else {
                return false;
            };
            state.dead.insert(conn_id, handle.clone());
            handle
        };

        tracing::debug!(%conn_id, "connection retired");
        self.notify(ConnectionNotice::Disconnected {
            conn_id,
            closed_by_client: handle.closed_by_client(),
            closed_by_server: handle.closed_by_server(),
        });
        true
    }

    pub async fn mark_pending(&self, conn_id: ConnectionId) {
        let newly_pending = self.state.write().await.pending_input.insert(conn_id);
        if newly_pending {
            self.notify(ConnectionNotice::InputPending { conn_id });
        }
    }

    /// Drain buffered lines from every connection with pending input.
    ///
    /// Lines keep their arrival order per connection. Connections whose
    /// buffer turned out empty are left out.
    pub async fn take_pending_commands(&self) -> Vec<(ConnectionId, Vec<String>)> {
        let handles: Vec<ConnectionHandle> = {
            let mut state = self.state.write().await;
            let ids: Vec<ConnectionId> = state.pending_input.drain().collect();
            ids.iter()
                .filter_map(|id| state.live.get(id).or_else(|| state.dead.get(id)).cloned())
                .collect()
        };

        let mut commands = Vec::with_capacity(handles.len());
        for handle in handles {
            let lines = handle.take_pending_lines().await;
            if !lines.is_empty() {
                commands.push((handle.id(), lines));
            }
        }
        commands
    }

    pub async fn get(&self, conn_id: ConnectionId) -> Option<ConnectionHandle> {
        self.state.read().await.live.get(&conn_id).cloned()
    }

    pub async fn live_ids(&self) -> Vec<ConnectionId> {
        self.state.read().await.live.keys().copied().collect()
    }

    pub async fn is_live(&self, conn_id: ConnectionId) -> bool {
        self.state.read().await.live.contains_key(&conn_id)
    }

    pub async fn is_dead(&self, conn_id: ConnectionId) -> bool {
        self.state.read().await.dead.contains_key(&conn_id)
    }

    /// Ask every live connection to close. Returns how many were asked.
    pub async fn close_all(&self) -> usize {
        let handles: Vec<ConnectionHandle> = self.state.read().await.live.values().cloned().collect();
        for handle in &handles {
            handle.close();
        }
        handles.len()
    }

    pub async fn live_count(&self) -> usize {
        self.state.read().await.live.len()
    }

    pub async fn dead_count(&self) -> usize {
        self.state.read().await.dead.len()
    }

    fn notify(&self, notice: ConnectionNotice) {
        if let Some(notifier) = &self.notifier {
            // Nobody listening is fine; the registry state is authoritative.
            let _ = notifier.send(notice);
        }
    }
}
