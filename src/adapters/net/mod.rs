//! Line-protocol networking: TCP listener, per-connection tasks and the
//! shared connection registry.

pub mod codec;
pub mod connection;
pub mod message;
pub mod registry;
pub mod server;

pub use codec::CrlfLineCodec;
pub use connection::{Connection, ConnectionEnd, ConnectionError, ConnectionHandle, ConnectionId};
pub use message::{OutFlags, OutMessage};
pub use registry::{ConnectionNotice, ConnectionRegistry};
pub use server::{Server, ServerError};
