//! [`Connector`](crate::connection::Connector) implementations.

pub mod memory;
pub mod ws;

pub use memory::{MemoryConnector, MemoryPeer};
pub use ws::WsConnector;
