//! Ownership of the real-time channel: connect, route inbound events to one
//! handler per event kind, emit commands, tear down.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use jobchat_types::events::{ChannelCommand, ChannelEvent, EventKind};

use crate::error::ConnectionError;

/// What the gateway authenticates a connection with.
#[derive(Clone)]
pub struct Credentials {
    pub token: String,
}

impl Credentials {
    pub fn bearer(token: impl Into<String>) -> Self {
        Self { token: token.into() }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials").field("token", &"<redacted>").finish()
    }
}

/// An established channel as handed over by a [`Connector`].
///
/// Dropping `outbound` or cancelling `shutdown` tells the transport to close;
/// the transport closes `inbound` when the far side goes away.
pub struct Link {
    pub outbound: mpsc::UnboundedSender<ChannelCommand>,
    pub inbound: mpsc::UnboundedReceiver<ChannelEvent>,
    pub shutdown: CancellationToken,
}

/// Transport seam. Anything offering at-least-once delivery of the inbound
/// events and fire-and-forget commands fits.
pub trait Connector: Send + Sync + 'static {
    fn connect(
        &self,
        credentials: &Credentials,
    ) -> impl Future<Output = Result<Link, ConnectionError>> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connected,
}

/// Outcome of [`ConnectionManager::emit`]. Not being connected is not an
/// error: the command is dropped and the caller learns it was not sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    Sent,
    NotConnected,
}

type Handler = Box<dyn Fn(ChannelEvent) + Send + Sync>;

struct Routing {
    /// Bumped on every connect and disconnect; a pump only delivers while
    /// its generation is current.
    generation: u64,
    handlers: HashMap<EventKind, Handler>,
}

pub struct ConnectionManager<C> {
    connector: C,
    routing: Arc<Mutex<Routing>>,
    outbound: Option<mpsc::UnboundedSender<ChannelCommand>>,
    shutdown: Option<CancellationToken>,
    pump: Option<JoinHandle<()>>,
    state: watch::Sender<ConnectionState>,
}

impl<C: Connector> ConnectionManager<C> {
    pub fn new(connector: C) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            connector,
            routing: Arc::new(Mutex::new(Routing {
                generation: 0,
                handlers: HashMap::new(),
            })),
            outbound: None,
            shutdown: None,
            pump: None,
            state,
        }
    }

    /// Registers the handler for `kind`, replacing any previous one.
    ///
    /// Handlers run on the pump task while the routing lock is held, so they
    /// must not call back into the manager.
    pub fn on<F>(&self, kind: EventKind, handler: F)
    where
        F: Fn(ChannelEvent) + Send + Sync + 'static,
    {
        if lock(&self.routing)
            .handlers
            .insert(kind, Box::new(handler))
            .is_some()
        {
            debug!(?kind, "replaced event handler");
        }
    }

    /// Establishes the channel, tearing down any current one first.
    pub async fn connect(&mut self, credentials: &Credentials) -> Result<(), ConnectionError> {
        self.disconnect();

        let link = self.connector.connect(credentials).await.map_err(|e| {
            warn!(error = %e, "real-time channel failed to connect");
            e
        })?;

        let generation = {
            let mut routing = lock(&self.routing);
            routing.generation += 1;
            routing.generation
        };

        let Link {
            outbound,
            mut inbound,
            shutdown,
        } = link;

        let routing = self.routing.clone();
        let state = self.state.clone();
        self.pump = Some(tokio::spawn(async move {
            while let Some(event) = inbound.recv().await {
                if !deliver(&routing, generation, event) {
                    return;
                }
            }
            if lock(&routing).generation == generation {
                warn!("real-time channel dropped");
                state.send_replace(ConnectionState::Disconnected);
            }
        }));

        self.outbound = Some(outbound);
        self.shutdown = Some(shutdown);
        self.state.send_replace(ConnectionState::Connected);
        info!("real-time channel connected");
        Ok(())
    }

    /// Fire-and-forget send.
    pub fn emit(&self, command: ChannelCommand) -> SendStatus {
        if self.state() != ConnectionState::Connected {
            debug!(?command, "dropping command, channel not connected");
            return SendStatus::NotConnected;
        }
        match &self.outbound {
            Some(outbound) if outbound.send(command).is_ok() => SendStatus::Sent,
            _ => {
                debug!("dropping command, transport is gone");
                SendStatus::NotConnected
            }
        }
    }

    /// Stops delivery and closes the channel. No handler runs after this
    /// returns. Idempotent.
    pub fn disconnect(&mut self) {
        lock(&self.routing).generation += 1;

        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        if let Some(shutdown) = self.shutdown.take() {
            shutdown.cancel();
        }
        if self.outbound.take().is_some() {
            info!("real-time channel disconnected");
        }
        self.state.send_replace(ConnectionState::Disconnected);
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }
}

impl<C> Drop for ConnectionManager<C> {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        if let Some(shutdown) = self.shutdown.take() {
            shutdown.cancel();
        }
    }
}

/// Routes one event. Returns false once the pump's generation is stale.
fn deliver(routing: &Mutex<Routing>, generation: u64, event: ChannelEvent) -> bool {
    let routing = lock(routing);
    if routing.generation != generation {
        return false;
    }
    let kind = event.kind();
    match routing.handlers.get(&kind) {
        Some(handler) => handler(event),
        None => debug!(?kind, "no handler registered, dropping event"),
    }
    true
}

fn lock(routing: &Mutex<Routing>) -> MutexGuard<'_, Routing> {
    routing.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
