//! Durable event scheduler.
//!
//! Reconciles the `events` table with the handler tasks running in this
//! process. Every tick runs three sweeps in order, each in its own
//! transaction:
//!
//! 0. reap: collect finished tasks and write any outcome they failed to record
//! 1. abort: cancel tasks whose rows were marked `aborted`
//! 2. cleanup: delete terminal rows and drop their tasks
//! 3. dispatch: claim `pending` rows as `active`, then start their handlers
//!
//! Cycles never overlap. Shutdown is only observed between cycles.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use sqlx::SqlitePool;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::event_handler::{EventContext, EventHandler, EventTask};
use super::handler_registry::HandlerRegistry;
use crate::adapters::sqlite::event_repository::{
    delete_by_ids, delete_non_persistent, record_outcome, select_by_states, update_state_by_ids, EventRow,
};
use crate::adapters::sqlite::parse_event_id;
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{EventState, SchedulerConfig};

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Failed to purge non-persistent events: {0}")]
    Purge(#[source] DomainError),
}

/// What one scheduler cycle did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    /// Outcomes of finished tasks written by the scheduler because the task
    /// could not write them itself.
    pub outcomes_recovered: usize,
    /// Running tasks asked to cancel.
    pub abort_requests: usize,
    /// `aborted` rows with no running task, moved straight to `cancelled`.
    pub orphans_cancelled: usize,
    /// Terminal rows deleted.
    pub cleaned: usize,
    /// `pending` rows deleted because they could not be dispatched.
    pub discarded: usize,
    /// Handlers started.
    pub dispatched: usize,
}

impl CycleReport {
    pub fn is_idle(&self) -> bool {
        *self == Self::default()
    }
}

/// Why a pending row was discarded instead of dispatched.
#[derive(Debug, Error)]
enum DispatchRejection {
    #[error("malformed event id")]
    MalformedId,
    #[error("invalid parameters: {0}")]
    InvalidParameters(#[source] serde_json::Error),
    #[error("no handler registered for this event name")]
    UnknownName,
}

struct PreparedEvent {
    id: Uuid,
    name: String,
    handler: Box<dyn EventHandler>,
}

pub struct EventScheduler {
    pool: SqlitePool,
    handlers: Arc<HandlerRegistry>,
    config: SchedulerConfig,
    tasks: HashMap<Uuid, EventTask>,
    /// Outcomes of reaped tasks not yet known to be in the store.
    unrecorded: HashMap<Uuid, EventState>,
}

impl EventScheduler {
    pub fn new(pool: SqlitePool, handlers: Arc<HandlerRegistry>, config: SchedulerConfig) -> Self {
        Self { pool, handlers, config, tasks: HashMap::new(), unrecorded: HashMap::new() }
    }

    /// Number of handler tasks currently tracked.
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_tracking(&self, id: Uuid) -> bool {
        self.tasks.contains_key(&id)
    }

    /// Purge ephemeral rows, then run cycles until `shutdown` is cancelled.
    ///
    /// On shutdown every tracked task is cancelled and given the configured
    /// grace period to record its outcome.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), SchedulerError> {
        self.purge_ephemeral().await.map_err(SchedulerError::Purge)?;
        self.run_loop(shutdown).await;
        Ok(())
    }

    /// Purge ephemeral rows, then spawn the cycle loop.
    ///
    /// Returns once the purge has committed, so producers started afterwards
    /// cannot lose rows to it.
    pub async fn start(self, shutdown: CancellationToken) -> Result<JoinHandle<()>, SchedulerError> {
        self.purge_ephemeral().await.map_err(SchedulerError::Purge)?;
        Ok(tokio::spawn(self.run_loop(shutdown)))
    }

    async fn run_loop(mut self, shutdown: CancellationToken) {
        let tick = Duration::from_millis(self.config.tick_interval_ms);
        info!(tick_ms = self.config.tick_interval_ms, handlers = ?self.handlers.names(), "event scheduler started");

        loop {
            let report = self.run_cycle().await;
            if !report.is_idle() {
                debug!(?report, "scheduler cycle");
            }

            tokio::select! {
                () = shutdown.cancelled() => break,
                () = tokio::time::sleep(tick) => {}
            }
        }

        self.shutdown_tasks().await;
        info!("event scheduler stopped");
    }

    /// Delete every non-persistent row regardless of state.
    pub async fn purge_ephemeral(&self) -> DomainResult<u64> {
        let mut tx = self.pool.begin().await?;
        let deleted = delete_non_persistent(&mut tx).await?;
        tx.commit().await?;

        info!(deleted, "purged non-persistent events");
        Ok(deleted)
    }

    /// Run one reap, abort, cleanup and dispatch pass.
    ///
    /// A failing sweep is logged and does not prevent the later ones.
    pub async fn run_cycle(&mut self) -> CycleReport {
        let mut report = CycleReport { outcomes_recovered: self.reap_finished().await, ..CycleReport::default() };

        match self.abort_sweep().await {
            Ok((requested, orphans)) => {
                report.abort_requests = requested;
                report.orphans_cancelled = orphans;
            }
            Err(e) => error!(error = %e, "abort sweep failed"),
        }

        match self.cleanup_sweep().await {
            Ok(cleaned) => report.cleaned = cleaned,
            Err(e) => error!(error = %e, "cleanup sweep failed"),
        }

        match self.dispatch_sweep().await {
            Ok((discarded, dispatched)) => {
                report.discarded = discarded;
                report.dispatched = dispatched;
            }
            Err(e) => error!(error = %e, "dispatch sweep failed"),
        }

        report
    }

    /// Stop tracking tasks that have exited and make sure their outcome
    /// reached the store.
    ///
    /// A task that hit a locked or unavailable store while recording leaves
    /// its row `active`; nothing else would ever move it. The outcome is
    /// written again here and retried on later cycles until the store
    /// accepts it or the row has moved on.
    async fn reap_finished(&mut self) -> usize {
        let finished: Vec<Uuid> =
            self.tasks.iter().filter(|(_, task)| task.is_finished()).map(|(id, _)| *id).collect();

        for id in finished {
            if let Some(task) = self.tasks.remove(&id) {
                let state = task.join().await.map_or(EventState::Error, |outcome| outcome.state());
                self.unrecorded.insert(id, state);
            }
        }

        self.record_unrecorded().await
    }

    async fn record_unrecorded(&mut self) -> usize {
        let pending: Vec<(Uuid, EventState)> = self.unrecorded.iter().map(|(id, state)| (*id, *state)).collect();

        let mut recovered = 0;
        for (id, state) in pending {
            match record_outcome(&self.pool, id, state).await {
                Ok(changed) => {
                    self.unrecorded.remove(&id);
                    if changed {
                        info!(event_id = %id, %state, "recorded outcome left behind by event task");
                        recovered += 1;
                    }
                }
                Err(e) => warn!(event_id = %id, %state, error = %e, "event outcome still unrecorded"),
            }
        }
        recovered
    }

    async fn abort_sweep(&mut self) -> DomainResult<(usize, usize)> {
        let mut tx = self.pool.begin().await?;
        let rows = select_by_states(&mut tx, &[EventState::Aborted]).await?;

        let mut requested = 0;
        let mut orphans = Vec::new();
        for row in rows {
            let running = parse_event_id(&row.id)
                .ok()
                .and_then(|id| self.tasks.get(&id))
                .filter(|task| !task.is_finished());

            match running {
                Some(task) => {
                    if !task.is_cancel_requested() {
                        debug!(event_id = %task.id(), event_name = task.name(), "cancelling aborted event");
                        task.cancel();
                        requested += 1;
                    }
                }
                None => orphans.push(row.id),
            }
        }

        let cancelled = update_state_by_ids(&mut tx, &orphans, EventState::Cancelled).await?;
        tx.commit().await?;

        if cancelled > 0 {
            debug!(cancelled, "cancelled aborted events with no running task");
        }
        Ok((requested, usize::try_from(cancelled).unwrap_or(usize::MAX)))
    }

    async fn cleanup_sweep(&mut self) -> DomainResult<usize> {
        let mut tx = self.pool.begin().await?;
        let rows = select_by_states(&mut tx, &EventState::TERMINAL).await?;
        let ids: Vec<String> = rows.iter().map(|row| row.id.clone()).collect();
        let deleted = delete_by_ids(&mut tx, &ids).await?;
        tx.commit().await?;

        for row in &rows {
            debug!(event_id = %row.id, event_name = %row.event_name, state = %row.current_state, "cleaned up event");
            let Ok(id) = parse_event_id(&row.id) else { continue };
            if let Some(task) = self.tasks.remove(&id) {
                // Either the task is returning after recording its outcome, or
                // another writer moved the row on while the handler still ran.
                if !task.is_finished() {
                    debug!(event_id = %id, "dropping event task that has not exited yet");
                    task.cancel();
                }
            }
        }

        Ok(usize::try_from(deleted).unwrap_or(usize::MAX))
    }

    async fn dispatch_sweep(&mut self) -> DomainResult<(usize, usize)> {
        let mut tx = self.pool.begin().await?;
        let rows = select_by_states(&mut tx, &[EventState::Pending]).await?;

        let mut discarded = Vec::new();
        let mut claimed = Vec::new();
        let mut prepared = Vec::new();
        for row in rows {
            match self.prepare(&row) {
                Ok(event) => {
                    claimed.push(row.id);
                    prepared.push(event);
                }
                Err(reason) => {
                    error!(event_id = %row.id, event_name = %row.event_name, %reason, "discarding event");
                    discarded.push(row.id);
                }
            }
        }

        delete_by_ids(&mut tx, &discarded).await?;
        update_state_by_ids(&mut tx, &claimed, EventState::Active).await?;
        tx.commit().await?;

        // Only start handlers once the `active` transition is durable.
        let dispatched = prepared.len();
        for PreparedEvent { id, name, handler } in prepared {
            debug!(event_id = %id, event_name = %name, "starting event");
            let task = EventTask::spawn(id, name, handler, self.pool.clone());
            self.tasks.insert(id, task);
        }

        Ok((discarded.len(), dispatched))
    }

    fn prepare(&self, row: &EventRow) -> Result<PreparedEvent, DispatchRejection> {
        let id = parse_event_id(&row.id).map_err(|_| DispatchRejection::MalformedId)?;
        let parameters: Value =
            serde_json::from_str(&row.parameters).map_err(DispatchRejection::InvalidParameters)?;

        let context = EventContext { id, parameters, pool: self.pool.clone() };
        let handler = self
            .handlers
            .instantiate(&row.event_name, context)
            .ok_or(DispatchRejection::UnknownName)?;

        Ok(PreparedEvent { id, name: row.event_name.clone(), handler })
    }

    async fn shutdown_tasks(&mut self) {
        if self.tasks.is_empty() && self.unrecorded.is_empty() {
            return;
        }

        let tasks: Vec<EventTask> = self.tasks.drain().map(|(_, task)| task).collect();
        let count = tasks.len();
        for task in &tasks {
            task.cancel();
        }

        let grace = Duration::from_millis(self.config.shutdown_grace_ms);
        let joins = tasks.into_iter().map(|task| async move {
            let id = task.id();
            (id, task.join().await)
        });
        match tokio::time::timeout(grace, futures::future::join_all(joins)).await {
            Ok(outcomes) => {
                for (id, outcome) in outcomes {
                    self.unrecorded.insert(id, outcome.map_or(EventState::Error, |outcome| outcome.state()));
                }
                if count > 0 {
                    info!(count, "cancelled in-flight events");
                }
            }
            Err(_) => warn!(count, grace_ms = self.config.shutdown_grace_ms, "gave up waiting for in-flight events"),
        }

        self.record_unrecorded().await;
        if !self.unrecorded.is_empty() {
            error!(count = self.unrecorded.len(), "event outcomes lost at shutdown");
        }
    }
}
