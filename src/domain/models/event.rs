//! Event domain model.
//!
//! Events are durable units of game work. Each row names a handler and
//! carries an opaque JSON payload; the scheduler drives it through the
//! state machine below.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// State of an event row.
///
/// ```text
/// pending --> active --> finished | error | cancelled
///    |          |
///    +----------+--> aborted (external request) --> cancelled
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventState {
    /// Waiting for the scheduler to claim it
    #[default]
    Pending,
    /// Claimed; a handler task owns it
    Active,
    /// Handler returned normally
    Finished,
    /// Handler task was cancelled
    Cancelled,
    /// Handler raised an error
    Error,
    /// A third party asked for cancellation
    Aborted,
}

impl EventState {
    /// Every state, in declaration order.
    pub const ALL: [EventState; 6] = [
        Self::Pending,
        Self::Active,
        Self::Finished,
        Self::Cancelled,
        Self::Error,
        Self::Aborted,
    ];

    /// States eligible for cleanup.
    pub const TERMINAL: [EventState; 3] = [Self::Finished, Self::Cancelled, Self::Error];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Finished => "finished",
            Self::Cancelled => "cancelled",
            Self::Error => "error",
            Self::Aborted => "aborted",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "active" => Some(Self::Active),
            "finished" => Some(Self::Finished),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            "error" => Some(Self::Error),
            "aborted" => Some(Self::Aborted),
            _ => None,
        }
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Cancelled | Self::Error)
    }

    /// Valid transitions from this state.
    pub fn valid_transitions(&self) -> Vec<EventState> {
        match self {
            Self::Pending => vec![Self::Active, Self::Aborted],
            Self::Active => vec![Self::Finished, Self::Error, Self::Cancelled, Self::Aborted],
            // The handler may still complete before it observes the abort.
            Self::Aborted => vec![Self::Cancelled, Self::Finished, Self::Error],
            Self::Finished | Self::Cancelled | Self::Error => vec![],
        }
    }

    pub fn can_transition_to(&self, new_state: Self) -> bool {
        self.valid_transitions().contains(&new_state)
    }

    /// States a row may be in for a move to `target` to be legal.
    ///
    /// The store uses this as the `WHERE current_state IN (...)` guard of
    /// every conditional state update.
    pub fn sources_of(target: Self) -> Vec<EventState> {
        Self::ALL.into_iter().filter(|state| state.can_transition_to(target)).collect()
    }
}

impl fmt::Display for EventState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one handler execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    /// `run` returned normally and the transaction committed.
    Finished,
    /// `validate` or `run` failed, or the handler panicked.
    Error(String),
    /// The task observed its cancellation signal.
    Cancelled,
}

impl EventOutcome {
    /// Terminal state recorded for this outcome.
    pub fn state(&self) -> EventState {
        match self {
            Self::Finished => EventState::Finished,
            Self::Error(_) => EventState::Error,
            Self::Cancelled => EventState::Cancelled,
        }
    }
}

/// A durable job record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub name: String,
    pub parameters: serde_json::Value,
    pub state: EventState,
    pub persistent: bool,
    pub created_at: DateTime<Utc>,
}

impl Event {
    /// Create a new pending, non-persistent event.
    pub fn new(name: impl Into<String>, parameters: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            parameters,
            state: EventState::Pending,
            persistent: false,
            created_at: Utc::now(),
        }
    }

    /// Mark the event as surviving process restarts.
    pub fn persistent(mut self) -> Self {
        self.persistent = true;
        self
    }

    pub fn with_state(mut self, state: EventState) -> Self {
        self.state = state;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_state_round_trip_names() {
        for state in EventState::ALL {
            assert_eq!(EventState::from_str(state.as_str()), Some(state));
        }
        assert_eq!(EventState::from_str("canceled"), Some(EventState::Cancelled));
        assert_eq!(EventState::from_str("running"), None);
    }

    #[test]
    fn test_terminal_states() {
        let terminal: Vec<_> = EventState::ALL.into_iter().filter(EventState::is_terminal).collect();
        assert_eq!(terminal, EventState::TERMINAL.to_vec());
    }

    #[test]
    fn test_transitions() {
        assert!(EventState::Pending.can_transition_to(EventState::Active));
        assert!(!EventState::Pending.can_transition_to(EventState::Finished));
        assert!(EventState::Active.can_transition_to(EventState::Cancelled));
        assert!(EventState::Aborted.can_transition_to(EventState::Cancelled));
        assert!(!EventState::Finished.can_transition_to(EventState::Active));
        assert!(EventState::Error.valid_transitions().is_empty());
    }

    #[test]
    fn test_sources_of() {
        assert_eq!(EventState::sources_of(EventState::Aborted), vec![EventState::Pending, EventState::Active]);
        for terminal in EventState::TERMINAL {
            assert_eq!(EventState::sources_of(terminal), vec![EventState::Active, EventState::Aborted]);
        }
        assert!(EventState::sources_of(EventState::Pending).is_empty());
    }

    #[test]
    fn test_outcome_maps_to_terminal_state() {
        assert_eq!(EventOutcome::Finished.state(), EventState::Finished);
        assert_eq!(EventOutcome::Error("boom".into()).state(), EventState::Error);
        assert_eq!(EventOutcome::Cancelled.state(), EventState::Cancelled);
        assert!(EventOutcome::Cancelled.state().is_terminal());
    }

    #[test]
    fn test_new_event_defaults() {
        let event = Event::new("ClientConnected", json!({"conn_id": "x"}));
        assert_eq!(event.state, EventState::Pending);
        assert_eq!(EventState::default(), EventState::Pending);
        assert!(!event.persistent);
        assert!(event.clone().persistent().persistent);
    }
}
