//! Application layer: wires storage, the scheduler, the listener and the
//! command forwarder into one process.

pub mod app;
pub mod shutdown;

pub use app::{Application, RunningApplication};
pub use shutdown::spawn_signal_listener;
