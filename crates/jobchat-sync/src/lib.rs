//! Client-side synchronization core for jobchat conversations.
//!
//! [`runtime::ChatSession`] is the entry point: it owns the real-time
//! channel, merges optimistic sends with server echoes, keeps the
//! conversation list fresh and publishes a renderable [`runtime::ChatSnapshot`].

pub mod api;
pub mod config;
pub mod connection;
pub mod directory;
pub mod error;
pub mod matching;
pub mod message;
pub mod reconciler;
pub mod runtime;
pub mod session;
pub mod transport;
pub mod view;

pub use api::{ChatApi, HttpChatApi};
pub use config::ClientConfig;
pub use connection::{ConnectionManager, ConnectionState, Connector, Credentials, SendStatus};
pub use error::SyncError;
pub use runtime::{ChatSession, ChatSnapshot, SessionHandle};
