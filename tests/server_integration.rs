//! End-to-end tests: real TCP clients against a started application.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dbat::adapters::sqlite::SqliteEventRepository;
use dbat::application::Application;
use dbat::domain::models::{Event, EventState};
use dbat::domain::ports::EventRepository;
use dbat::services::{
    ClientConnected, ClientDisconnected, ClientSubmittedCommand, ConnectionEvent, EventContext, EventError,
    EventHandler, HandlerRegistry,
};
use serde_json::json;
use sqlx::SqliteConnection;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use common::{open_pool, setup_test_logging, temp_db, test_config, wait_for};

type Journal = Arc<Mutex<Vec<(String, serde_json::Value)>>>;

/// Appends every event it runs to a shared journal.
struct Record {
    name: &'static str,
    parameters: serde_json::Value,
    journal: Journal,
}

#[async_trait]
impl EventHandler for Record {
    async fn run(&mut self, _conn: &mut SqliteConnection) -> Result<(), EventError> {
        self.journal.lock().unwrap().push((self.name.to_string(), self.parameters.clone()));
        Ok(())
    }
}

fn recording_handlers(journal: &Journal) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    for name in [ClientConnected::NAME, ClientSubmittedCommand::NAME, ClientDisconnected::NAME] {
        let journal = journal.clone();
        registry.register(name, move |ctx: EventContext| -> Box<dyn EventHandler> {
            Box::new(Record { name, parameters: ctx.parameters, journal: journal.clone() })
        });
    }
    registry
}

fn recorded(journal: &Journal, name: &str) -> Vec<serde_json::Value> {
    journal
        .lock()
        .unwrap()
        .iter()
        .filter(|(recorded, _)| recorded == name)
        .map(|(_, parameters)| parameters.clone())
        .collect()
}

#[tokio::test]
async fn test_client_session_flows_through_event_queue() {
    setup_test_logging();
    let (_dir, url) = temp_db();
    let journal = Journal::default();

    let app = Application::setup(test_config(&url)).await.unwrap().with_handlers(recording_handlers(&journal));
    let running = app.start().await.unwrap();

    let mut client = TcpStream::connect(running.local_addr()).await.unwrap();
    assert!(wait_for(|| async { !recorded(&journal, ClientConnected::NAME).is_empty() }, 3000).await);

    // Split mid-line across two writes; the server must reassemble it.
    client.write_all(b"lo").await.unwrap();
    client.flush().await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    client.write_all(b"ok\r\nsay hi\r\n").await.unwrap();

    assert!(wait_for(|| async { recorded(&journal, ClientSubmittedCommand::NAME).len() == 2 }, 3000).await);
    let commands = recorded(&journal, ClientSubmittedCommand::NAME);
    let mut lines: Vec<&str> = commands.iter().map(|p| p["command"].as_str().unwrap()).collect();
    lines.sort_unstable();
    assert_eq!(lines, vec!["look", "say hi"]);

    // Reply through the registry, the way a game handler would.
    let conn_id: uuid::Uuid = serde_json::from_value(commands[0]["conn_id"].clone()).unwrap();
    let handle = running.registry().get(conn_id).await.unwrap();
    handle.send_line("You see a training room.").unwrap();

    let mut reader = BufReader::new(client);
    let mut reply = String::new();
    tokio::time::timeout(Duration::from_secs(2), reader.read_line(&mut reply)).await.unwrap().unwrap();
    assert_eq!(reply, "You see a training room.\r\n");

    drop(reader);
    assert!(wait_for(|| async { !recorded(&journal, ClientDisconnected::NAME).is_empty() }, 3000).await);
    let disconnected = recorded(&journal, ClientDisconnected::NAME);
    assert_eq!(disconnected[0], json!({"conn_id": conn_id, "closed_by_client": true}));
    assert!(running.registry().is_dead(conn_id).await);

    // Connection events are ephemeral and get cleaned once handled.
    let repo = SqliteEventRepository::new(running.pool().clone());
    assert!(wait_for(|| async { repo.list(None).await.unwrap().is_empty() }, 3000).await);

    running.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_closes_open_clients() {
    let (_dir, url) = temp_db();
    let journal = Journal::default();
    let app = Application::setup(test_config(&url)).await.unwrap().with_handlers(recording_handlers(&journal));
    let running = app.start().await.unwrap();

    let mut client = TcpStream::connect(running.local_addr()).await.unwrap();
    assert!(wait_for(|| async { running.registry().live_count().await == 1 }, 3000).await);

    running.shutdown().await.unwrap();

    let mut rest = Vec::new();
    let read = tokio::time::timeout(Duration::from_secs(2), client.read_to_end(&mut rest)).await.unwrap();
    assert!(read.is_ok());
}

/// Never completes on its own.
struct Linger;

#[async_trait]
impl EventHandler for Linger {
    async fn run(&mut self, _conn: &mut SqliteConnection) -> Result<(), EventError> {
        std::future::pending::<()>().await;
        Ok(())
    }
}

#[tokio::test]
async fn test_restart_purges_ephemeral_and_cancels_in_flight() {
    let (_dir, url) = temp_db();

    let pool = open_pool(&url).await;
    let repo = SqliteEventRepository::new(pool.clone());
    let durable = Event::new("Linger", json!({})).persistent();
    let ephemeral = Event::new("Linger", json!({}));
    repo.create(&durable).await.unwrap();
    repo.create(&ephemeral).await.unwrap();

    let mut handlers = HandlerRegistry::with_connection_handlers();
    handlers.register("Linger", |_ctx| -> Box<dyn EventHandler> { Box::new(Linger) });
    let running = Application::setup(test_config(&url)).await.unwrap().with_handlers(handlers).start().await.unwrap();

    // The purge has committed by the time start returns.
    assert!(repo.get(ephemeral.id).await.unwrap().is_none());
    let claimed = wait_for(
        || async { repo.get(durable.id).await.unwrap().map(|e| e.state) == Some(EventState::Active) },
        3000,
    )
    .await;
    assert!(claimed);

    running.shutdown().await.unwrap();

    let stored = repo.get(durable.id).await.unwrap().unwrap();
    assert_eq!(stored.state, EventState::Cancelled);
    pool.close().await;
}
