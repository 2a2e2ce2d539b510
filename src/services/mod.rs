//! Service layer: handler execution, the event scheduler and the bridge
//! from connections into the event store.

pub mod command_forwarder;
pub mod connection_handlers;
pub mod event_handler;
pub mod event_scheduler;
pub mod handler_registry;

pub use command_forwarder::CommandForwarder;
pub use connection_handlers::{
    ClientConnected, ClientDisconnected, ClientSubmittedCommand, ConnectionEvent, ConnectionEventHandler,
};
pub use event_handler::{EventContext, EventError, EventHandler, EventTask};
pub use event_scheduler::{CycleReport, EventScheduler, SchedulerError};
pub use handler_registry::{HandlerFactory, HandlerRegistry};
