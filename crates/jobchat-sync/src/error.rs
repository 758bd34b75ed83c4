use thiserror::Error;
use uuid::Uuid;

/// Failure to bring up a session with [`ChatSession::open`](crate::ChatSession::open).
/// Once a session runs, each component absorbs its own failures and leaves
/// state stale but intact.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),
}

/// The real-time channel failed to establish or dropped.
/// Recoverable by calling `connect()` again.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("authentication rejected: {0}")]
    Rejected(String),

    #[error("gateway unreachable: {0}")]
    Unreachable(String),

    #[error("connection closed")]
    Closed,
}

/// A conversation-list, transcript or participant fetch failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Transport(String),

    #[error("server answered {0}")]
    Status(u16),

    #[error("unexpected response body: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Decode(e.to_string())
        } else if let Some(status) = e.status() {
            Self::Status(status.as_u16())
        } else {
            Self::Transport(e.to_string())
        }
    }
}

/// An inbound event or fetch result that cannot be applied to the current
/// transcript. Always a logged no-op, never surfaced to the user.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StaleEventError {
    #[error("message {0} is not in the open transcript")]
    UnknownMessage(Uuid),

    #[error("event belongs to the conversation with {counterpart}, which is not open")]
    OtherConversation { counterpart: Uuid },

    #[error("malformed event: {0}")]
    Malformed(&'static str),
}

/// A local edit that the client refuses before it reaches the server.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EditRejected {
    #[error("message {0} is not in the open transcript")]
    UnknownMessage(Uuid),

    #[error("message {0} was sent by someone else")]
    NotOwnMessage(Uuid),

    #[error("edited content is empty")]
    EmptyContent,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} is not a valid value: {reason}")]
    Invalid { var: &'static str, reason: String },
}
