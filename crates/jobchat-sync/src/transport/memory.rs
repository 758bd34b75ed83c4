//! In-process transport. Each successful connect hands the server side of
//! the link to whoever holds the peer receiver.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use jobchat_types::events::{ChannelCommand, ChannelEvent};

use crate::connection::{Connector, Credentials, Link};
use crate::error::ConnectionError;

/// Server side of one in-process link.
pub struct MemoryPeer {
    pub commands: mpsc::UnboundedReceiver<ChannelCommand>,
    pub events: mpsc::UnboundedSender<ChannelEvent>,
    /// Cancelled when the client disconnects.
    pub shutdown: CancellationToken,
}

pub struct MemoryConnector {
    token: String,
    peers: mpsc::UnboundedSender<MemoryPeer>,
}

impl MemoryConnector {
    /// Accepts only `token`. Every accepted connection shows up on the
    /// returned receiver.
    pub fn new(token: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<MemoryPeer>) {
        let (peers, accepted) = mpsc::unbounded_channel();
        (
            Self {
                token: token.into(),
                peers,
            },
            accepted,
        )
    }
}

impl Connector for MemoryConnector {
    async fn connect(&self, credentials: &Credentials) -> Result<Link, ConnectionError> {
        if credentials.token != self.token {
            return Err(ConnectionError::Rejected("invalid token".into()));
        }

        let (outbound, commands) = mpsc::unbounded_channel();
        let (events, inbound) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        self.peers
            .send(MemoryPeer {
                commands,
                events,
                shutdown: shutdown.clone(),
            })
            .map_err(|_| ConnectionError::Unreachable("in-process gateway is gone".into()))?;

        debug!("in-process link established");
        Ok(Link {
            outbound,
            inbound,
            shutdown,
        })
    }
}
