//! Event handler contract and the task that executes one handler instance.
//!
//! A handler runs inside a single store transaction. Whatever happens to
//! it (success, failure, panic, cancellation) is folded into an
//! [`EventOutcome`] and written back with one update keyed by the event id.

use std::any::Any;
use std::panic::AssertUnwindSafe;

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::Value;
use sqlx::{SqliteConnection, SqlitePool};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn, Instrument};
use uuid::Uuid;

use crate::adapters::sqlite::event_repository::record_outcome;
use crate::domain::models::EventOutcome;

/// Errors a handler can raise. Every variant maps to the `error` state.
#[derive(Debug, Error)]
pub enum EventError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Invalid parameters: {0}")]
    Parameters(#[from] serde_json::Error),

    #[error("Store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("{0}")]
    Failed(String),
}

/// Everything a handler factory gets to build an instance.
///
/// Factories must not perform I/O; that belongs in `validate` or `run`.
#[derive(Debug, Clone)]
pub struct EventContext {
    pub id: Uuid,
    pub parameters: Value,
    pub pool: SqlitePool,
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Precondition check, run before any transaction is opened.
    async fn validate(&mut self) -> Result<(), EventError> {
        Ok(())
    }

    /// Domain logic. Returning an error rolls the transaction back.
    async fn run(&mut self, conn: &mut SqliteConnection) -> Result<(), EventError>;
}

/// A running handler instance owned by the scheduler.
pub struct EventTask {
    id: Uuid,
    name: String,
    cancel: CancellationToken,
    join: JoinHandle<EventOutcome>,
}

impl EventTask {
    /// Start executing `handler` for the event `id`.
    pub fn spawn(id: Uuid, name: String, handler: Box<dyn EventHandler>, pool: SqlitePool) -> Self {
        let cancel = CancellationToken::new();
        let span = tracing::info_span!("event", event_id = %id, event_name = %name);
        let join = tokio::spawn(execute(id, handler, pool, cancel.clone()).instrument(span));
        Self { id, name, cancel, join }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Request cancellation. The task records `cancelled` itself.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the task to end. `None` if it was aborted by the runtime.
    pub async fn join(self) -> Option<EventOutcome> {
        match self.join.await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                warn!(event_id = %self.id, error = %e, "event task did not complete");
                None
            }
        }
    }
}

async fn execute(id: Uuid, mut handler: Box<dyn EventHandler>, pool: SqlitePool, cancel: CancellationToken) -> EventOutcome {
    let body = AssertUnwindSafe(run_in_transaction(handler.as_mut(), &pool)).catch_unwind();

    let outcome = tokio::select! {
        biased;
        () = cancel.cancelled() => EventOutcome::Cancelled,
        result = body => match result {
            Ok(Ok(())) => EventOutcome::Finished,
            Ok(Err(e)) => {
                warn!(error = %e, "event handler failed");
                EventOutcome::Error(e.to_string())
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(panic = %message, "event handler panicked");
                EventOutcome::Error(format!("handler panicked: {message}"))
            }
        },
    };

    let state = outcome.state();
    match record_outcome(&pool, id, state).await {
        Ok(true) => debug!(%state, "event outcome recorded"),
        Ok(false) => warn!(%state, "event row no longer owned by this task; outcome dropped"),
        Err(e) => error!(%state, error = %e, "failed to record event outcome"),
    }
    outcome
}

async fn run_in_transaction(handler: &mut dyn EventHandler, pool: &SqlitePool) -> Result<(), EventError> {
    handler.validate().await?;

    let mut tx = pool.begin().await?;
    handler.run(&mut tx).await?;
    tx.commit().await?;
    Ok(())
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
