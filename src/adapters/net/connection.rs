//! A single client connection: a reader feeding buffered input lines and a
//! writer draining the outbound queue, both owned by one task.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

use super::codec::CrlfLineCodec;
use super::message::OutMessage;
use super::registry::ConnectionRegistry;

pub type ConnectionId = Uuid;

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Connection {0} is closed")]
    Closed(ConnectionId),
}

/// Why a connection task stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEnd {
    /// The client closed its side of the stream.
    ClosedByClient,
    /// A close was requested through the handle or a `CLOSE` message.
    ClosedByServer,
    /// Reading or writing failed.
    Failed(String),
}

struct Shared {
    id: ConnectionId,
    peer: Option<SocketAddr>,
    outbound: mpsc::UnboundedSender<OutMessage>,
    pending_lines: Mutex<VecDeque<String>>,
    closed_by_client: AtomicBool,
    closed_by_server: AtomicBool,
    lifecycle: CancellationToken,
}

/// Cheap, cloneable handle used by game logic to talk to a connection.
#[derive(Clone)]
pub struct ConnectionHandle {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.shared.id)
            .field("peer", &self.shared.peer)
            .finish_non_exhaustive()
    }
}

impl ConnectionHandle {
    pub fn id(&self) -> ConnectionId {
        self.shared.id
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.shared.peer
    }

    /// Queue a message for the writer.
    ///
    /// Fails once the connection task has ended.
    pub fn send(&self, message: OutMessage) -> Result<(), ConnectionError> {
        self.shared.outbound.send(message).map_err(|_| ConnectionError::Closed(self.id()))
    }

    pub fn send_line(&self, text: impl AsRef<str>) -> Result<(), ConnectionError> {
        self.send(OutMessage::line(text))
    }

    /// Stop the connection without flushing queued output.
    pub fn close(&self) {
        self.shared.closed_by_server.store(true, Ordering::SeqCst);
        self.shared.lifecycle.cancel();
    }

    /// Remove and return every buffered input line in arrival order.
    pub async fn take_pending_lines(&self) -> Vec<String> {
        self.shared.pending_lines.lock().await.drain(..).collect()
    }

    pub fn closed_by_client(&self) -> bool {
        self.shared.closed_by_client.load(Ordering::SeqCst)
    }

    pub fn closed_by_server(&self) -> bool {
        self.shared.closed_by_server.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lifecycle.is_cancelled()
    }

    pub(crate) async fn push_line(&self, line: String) {
        self.shared.pending_lines.lock().await.push_back(line);
    }
}

/// Owns the receiving end of a connection's outbound queue until
/// [`Connection::run`] consumes it.
pub struct Connection {
    handle: ConnectionHandle,
    outbound: mpsc::UnboundedReceiver<OutMessage>,
    registry: ConnectionRegistry,
}

impl Connection {
    pub fn new(id: ConnectionId, peer: Option<SocketAddr>, registry: ConnectionRegistry) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Shared {
            id,
            peer,
            outbound: tx,
            pending_lines: Mutex::new(VecDeque::new()),
            closed_by_client: AtomicBool::new(false),
            closed_by_server: AtomicBool::new(false),
            lifecycle: CancellationToken::new(),
        };
        Self { handle: ConnectionHandle { shared: Arc::new(shared) }, outbound: rx, registry }
    }

    pub fn handle(&self) -> ConnectionHandle {
        self.handle.clone()
    }

    /// Spawn [`Connection::run`] on the runtime.
    pub fn start<S>(self, stream: S) -> JoinHandle<ConnectionEnd>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let span = tracing::info_span!("connection", conn_id = %self.handle.id());
        tokio::spawn(self.run(stream).instrument(span))
    }

    /// Drive the connection until either side closes it.
    ///
    /// Teardown runs once: the write half is shut down and the id moves
    /// from the live to the dead registry.
    pub async fn run<S>(self, stream: S) -> ConnectionEnd
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let Self { handle, mut outbound, registry } = self;
        let (read_half, mut write_half) = tokio::io::split(stream);
        let lifecycle = handle.shared.lifecycle.clone();

        let end = tokio::select! {
            end = read_lines(&handle, &registry, read_half) => end,
            end = write_messages(&handle, &mut outbound, &mut write_half) => end,
            () = lifecycle.cancelled() => ConnectionEnd::ClosedByServer,
        };

        if let Err(e) = write_half.shutdown().await {
            debug!(error = %e, "socket shutdown failed");
        }
        lifecycle.cancel();
        registry.retire(handle.id()).await;

        info!(
            end = ?end,
            closed_by_client = handle.closed_by_client(),
            closed_by_server = handle.closed_by_server(),
            "connection closed"
        );
        end
    }
}

async fn read_lines<R>(handle: &ConnectionHandle, registry: &ConnectionRegistry, reader: R) -> ConnectionEnd
where
    R: AsyncRead + Unpin,
{
    let mut lines = FramedRead::new(reader, CrlfLineCodec::new());
    while let Some(line) = lines.next().await {
        match line {
            Ok(line) => {
                handle.push_line(line).await;
                registry.mark_pending(handle.id()).await;
            }
            Err(e) => {
                warn!(error = %e, "read failed");
                return ConnectionEnd::Failed(e.to_string());
            }
        }
    }
    handle.shared.closed_by_client.store(true, Ordering::SeqCst);
    ConnectionEnd::ClosedByClient
}

async fn write_messages<W>(
    handle: &ConnectionHandle,
    outbound: &mut mpsc::UnboundedReceiver<OutMessage>,
    writer: &mut W,
) -> ConnectionEnd
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = outbound.recv().await {
        let written = async {
            writer.write_all(&message.data).await?;
            writer.flush().await
        };
        if let Err(e) = written.await {
            warn!(error = %e, "write failed");
            return ConnectionEnd::Failed(e.to_string());
        }
        if message.closes_connection() {
            handle.shared.closed_by_server.store(true, Ordering::SeqCst);
            return ConnectionEnd::ClosedByServer;
        }
    }
    // The handle holds a sender for as long as the connection runs.
    ConnectionEnd::ClosedByServer
}
