//! Event CLI commands: enqueue, inspect, and abort rows in the durable queue.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use serde_json::Value;
use uuid::Uuid;

use crate::adapters::sqlite::{open_store, PoolConfig, SqliteEventRepository};
use crate::cli::output::{output, truncate, CommandOutput};
use crate::domain::models::{Config, Event, EventState};
use crate::domain::ports::EventRepository;

#[derive(Args, Debug)]
pub struct EventArgs {
    #[command(subcommand)]
    pub command: EventCommands,
}

#[derive(Subcommand, Debug)]
pub enum EventCommands {
    /// Insert a pending event for the scheduler to pick up
    Enqueue {
        /// Handler name the event is dispatched to
        name: String,
        /// JSON parameters handed to the handler
        #[arg(short, long, default_value = "{}")]
        params: String,
        /// Keep the row across server restarts
        #[arg(long)]
        persistent: bool,
    },
    /// List events, oldest first
    List {
        /// Filter by state (pending, active, finished, cancelled, error, aborted)
        #[arg(short, long)]
        state: Option<String>,
        /// Maximum number of events to show
        #[arg(short, long, default_value = "50")]
        limit: usize,
    },
    /// Ask the scheduler to cancel a pending or active event
    Abort {
        /// Event ID
        id: Uuid,
    },
    /// Show event counts per state
    Stats,
}

#[derive(Debug, serde::Serialize)]
pub struct EventEntry {
    pub id: Uuid,
    pub name: String,
    pub state: String,
    pub persistent: bool,
    pub created_at: String,
    pub parameters: Value,
}

impl From<Event> for EventEntry {
    fn from(event: Event) -> Self {
        Self {
            id: event.id,
            name: event.name,
            state: event.state.to_string(),
            persistent: event.persistent,
            created_at: event.created_at.format("%Y-%m-%d %H:%M:%S%.3f").to_string(),
            parameters: event.parameters,
        }
    }
}

#[derive(Debug, serde::Serialize)]
pub struct EventListOutput {
    pub events: Vec<EventEntry>,
    pub total: usize,
}

impl CommandOutput for EventListOutput {
    fn to_human(&self) -> String {
        if self.events.is_empty() {
            return "No events found.".to_string();
        }

        let mut lines = vec![format!("Showing {} of {} event(s):\n", self.events.len(), self.total)];
        lines.push(format!(
            "{:<38} {:<24} {:<10} {:<5} {:<24} {:<30}",
            "ID", "NAME", "STATE", "KEEP", "CREATED", "PARAMETERS"
        ));
        lines.push("-".repeat(136));
        for e in &self.events {
            lines.push(format!(
                "{:<38} {:<24} {:<10} {:<5} {:<24} {:<30}",
                e.id,
                truncate(&e.name, 24),
                e.state,
                if e.persistent { "yes" } else { "no" },
                e.created_at,
                truncate(&e.parameters.to_string(), 30)
            ));
        }
        lines.join("\n")
    }
}

#[derive(Debug, serde::Serialize)]
pub struct EventActionOutput {
    pub message: String,
    pub id: Uuid,
    pub success: bool,
}

impl CommandOutput for EventActionOutput {
    fn to_human(&self) -> String {
        self.message.clone()
    }
}

#[derive(Debug, serde::Serialize)]
pub struct EventStatsOutput {
    pub counts: Vec<(String, u64)>,
    pub total: u64,
}

impl CommandOutput for EventStatsOutput {
    fn to_human(&self) -> String {
        let mut lines = vec!["Event Queue:".to_string()];
        for (state, count) in &self.counts {
            lines.push(format!("  {:<12} {}", format!("{state}:"), count));
        }
        lines.push(format!("  {:<12} {}", "total:", self.total));
        lines.join("\n")
    }

    fn to_json(&self) -> Value {
        let counts: serde_json::Map<String, Value> =
            self.counts.iter().map(|(state, count)| (state.clone(), Value::from(*count))).collect();
        serde_json::json!({ "counts": counts, "total": self.total })
    }
}

fn parse_state(s: &str) -> Result<EventState> {
    EventState::from_str(&s.to_lowercase()).ok_or_else(|| {
        let valid: Vec<&str> = EventState::ALL.iter().map(EventState::as_str).collect();
        anyhow::anyhow!("Unknown event state '{}'. Expected one of: {}", s, valid.join(", "))
    })
}

pub async fn execute(args: EventArgs, config: &Config, json_mode: bool) -> Result<()> {
    let pool = open_store(&config.database.url, &PoolConfig::from(&config.database))
        .await
        .with_context(|| format!("Failed to open event store at {}", config.database.url))?;
    let repo = SqliteEventRepository::new(pool.clone());

    let result = run(&repo, args.command, json_mode).await;
    pool.close().await;
    result
}

async fn run<R: EventRepository>(repo: &R, command: EventCommands, json_mode: bool) -> Result<()> {
    match command {
        EventCommands::Enqueue { name, params, persistent } => {
            let parameters: Value =
                serde_json::from_str(&params).context("Event parameters must be valid JSON")?;

            let mut event = Event::new(name, parameters);
            if persistent {
                event = event.persistent();
            }
            repo.create(&event)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to enqueue event: {}", e))?;

            let out = EventActionOutput {
                message: format!("Enqueued {} event {}", event.name, event.id),
                id: event.id,
                success: true,
            };
            output(&out, json_mode);
        }

        EventCommands::List { state, limit } => {
            let state = state.as_deref().map(parse_state).transpose()?;
            let events = repo
                .list(state)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to list events: {}", e))?;

            let total = events.len();
            let out = EventListOutput {
                events: events.into_iter().take(limit).map(EventEntry::from).collect(),
                total,
            };
            output(&out, json_mode);
        }

        EventCommands::Abort { id } => {
            let success = repo
                .request_abort(id)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to abort event: {}", e))?;

            let message = if success {
                format!("Abort requested for event {id}")
            } else {
                format!("Event {id} is not pending or active; nothing to abort")
            };
            output(&EventActionOutput { message, id, success }, json_mode);
        }

        EventCommands::Stats => {
            let counts = repo
                .count_by_state()
                .await
                .map_err(|e| anyhow::anyhow!("Failed to count events: {}", e))?;

            let counts: Vec<(String, u64)> = EventState::ALL
                .iter()
                .map(|state| (state.to_string(), counts.get(state).copied().unwrap_or(0)))
                .collect();
            let total = counts.iter().map(|(_, count)| count).sum();
            output(&EventStatsOutput { counts, total }, json_mode);
        }
    }

    Ok(())
}
