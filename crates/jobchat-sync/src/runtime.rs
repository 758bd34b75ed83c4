//! The session actor: one task owns [`ChatState`], the connection and the
//! REST client, and serializes every action, inbound event and fetch
//! completion through a single `select!` loop.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use jobchat_types::events::{ChannelCommand, ChannelEvent, EventKind};
use jobchat_types::models::{ChatMessage, ConversationSummary, Participant};

use crate::api::{ChatApi, HttpChatApi};
use crate::config::ClientConfig;
use crate::connection::{ConnectionManager, ConnectionState, Connector, Credentials, SendStatus};
use crate::directory::{Conversation, RefreshTicket};
use crate::error::{ConnectionError, FetchError, SyncError};
use crate::transport::WsConnector;
use crate::session::{ChatState, Effect, LoadTicket};
use crate::view::{MessageGroup, TranscriptView};

/// Everything a UI needs to render, published after every step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatSnapshot {
    pub connection: ConnectionState,
    pub conversations: Vec<Conversation>,
    pub unread: usize,
    pub selected: Option<Uuid>,
    pub participant: Option<Participant>,
    pub loading: bool,
    pub load_failed: bool,
    pub groups: Vec<MessageGroup>,
    pub pending: usize,
}

impl ChatSnapshot {
    pub fn message_count(&self) -> usize {
        self.groups.iter().map(|g| g.rows.len()).sum()
    }

    pub fn contents(&self) -> Vec<&str> {
        self.groups
            .iter()
            .flat_map(|g| g.rows.iter().map(|r| r.content.as_str()))
            .collect()
    }
}

enum Action {
    Connect {
        credentials: Credentials,
        reply: oneshot::Sender<Result<(), ConnectionError>>,
    },
    Disconnect,
    Select(Uuid),
    Close,
    Send(String),
    SendTo { receiver_id: Uuid, content: String },
    ResendPending,
    Edit { id: Uuid, content: String },
    Delete(Uuid),
    DeleteConversation(Uuid),
    Refresh,
    Shutdown,
}

enum Completion {
    Transcript {
        ticket: LoadTicket,
        counterpart: Uuid,
        result: Result<Vec<ChatMessage>, FetchError>,
    },
    Participant {
        ticket: LoadTicket,
        id: Uuid,
        result: Result<Participant, FetchError>,
    },
    Directory {
        ticket: RefreshTicket,
        result: Result<Vec<ConversationSummary>, FetchError>,
    },
}

/// Cheap, cloneable front of a running [`ChatSession`].
#[derive(Clone)]
pub struct SessionHandle {
    actions: mpsc::UnboundedSender<Action>,
    snapshots: watch::Receiver<ChatSnapshot>,
}

impl SessionHandle {
    pub async fn connect(&self, credentials: Credentials) -> Result<(), ConnectionError> {
        let (reply, answer) = oneshot::channel();
        self.actions
            .send(Action::Connect { credentials, reply })
            .map_err(|_| ConnectionError::Closed)?;
        answer.await.map_err(|_| ConnectionError::Closed)?
    }

    pub fn disconnect(&self) {
        self.dispatch(Action::Disconnect);
    }

    pub fn select(&self, other_user_id: Uuid) {
        self.dispatch(Action::Select(other_user_id));
    }

    pub fn close(&self) {
        self.dispatch(Action::Close);
    }

    /// Sends to the open conversation.
    pub fn send(&self, content: impl Into<String>) {
        self.dispatch(Action::Send(content.into()));
    }

    pub fn send_to(&self, receiver_id: Uuid, content: impl Into<String>) {
        self.dispatch(Action::SendTo {
            receiver_id,
            content: content.into(),
        });
    }

    /// Re-emits every unconfirmed send, e.g. after reconnecting.
    pub fn resend_pending(&self) {
        self.dispatch(Action::ResendPending);
    }

    pub fn edit(&self, id: Uuid, content: impl Into<String>) {
        self.dispatch(Action::Edit {
            id,
            content: content.into(),
        });
    }

    pub fn delete(&self, id: Uuid) {
        self.dispatch(Action::Delete(id));
    }

    pub fn delete_conversation(&self, other_user_id: Uuid) {
        self.dispatch(Action::DeleteConversation(other_user_id));
    }

    pub fn refresh(&self) {
        self.dispatch(Action::Refresh);
    }

    pub fn shutdown(&self) {
        self.dispatch(Action::Shutdown);
    }

    pub fn snapshot(&self) -> ChatSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ChatSnapshot> {
        self.snapshots.clone()
    }

    fn dispatch(&self, action: Action) {
        if self.actions.send(action).is_err() {
            debug!("session already stopped");
        }
    }
}

pub struct ChatSession<A, C> {
    state: ChatState,
    view: TranscriptView,
    api: Arc<A>,
    connection: ConnectionManager<C>,
    connection_state: watch::Receiver<ConnectionState>,
    actions: mpsc::UnboundedReceiver<Action>,
    events: mpsc::UnboundedReceiver<ChannelEvent>,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions: mpsc::UnboundedReceiver<Completion>,
    snapshots: watch::Sender<ChatSnapshot>,
}

impl ChatSession<HttpChatApi, WsConnector> {
    /// Starts a session against a real backend and connects its channel.
    /// On failure nothing is left running.
    pub async fn open(
        config: &ClientConfig,
        local_user: Uuid,
        token: &str,
    ) -> Result<(SessionHandle, JoinHandle<()>), SyncError> {
        let api = HttpChatApi::new(config, token)?;
        let (handle, task) = Self::spawn(local_user, api, WsConnector::from_config(config));
        if let Err(e) = handle.connect(Credentials::bearer(token)).await {
            handle.shutdown();
            return Err(e.into());
        }
        Ok((handle, task))
    }

    /// [`ChatSession::open`] with the `JOBCHAT_*` environment configuration.
    pub async fn open_from_env(
        local_user: Uuid,
        token: &str,
    ) -> Result<(SessionHandle, JoinHandle<()>), SyncError> {
        let config = ClientConfig::from_env()?;
        Self::open(&config, local_user, token).await
    }
}

impl<A: ChatApi, C: Connector> ChatSession<A, C> {
    /// Starts the session task for `local_user`. The channel stays
    /// disconnected until [`SessionHandle::connect`].
    pub fn spawn(local_user: Uuid, api: A, connector: C) -> (SessionHandle, JoinHandle<()>) {
        let connection = ConnectionManager::new(connector);
        let (events_tx, events) = mpsc::unbounded_channel();
        for kind in EventKind::ALL {
            let events_tx = events_tx.clone();
            connection.on(kind, move |event| {
                let _ = events_tx.send(event);
            });
        }

        let (actions_tx, actions) = mpsc::unbounded_channel();
        let (completions_tx, completions) = mpsc::unbounded_channel();
        let (snapshots, snapshot_rx) = watch::channel(ChatSnapshot::default());

        let session = Self {
            state: ChatState::new(local_user),
            view: TranscriptView::new(),
            api: Arc::new(api),
            connection_state: connection.watch_state(),
            connection,
            actions,
            events,
            completions_tx,
            completions,
            snapshots,
        };
        let task = tokio::spawn(session.run());

        (
            SessionHandle {
                actions: actions_tx,
                snapshots: snapshot_rx,
            },
            task,
        )
    }

    async fn run(mut self) {
        info!(local_user = %self.state.local_user(), "chat session started");
        let effects = self.state.start();
        self.execute(effects);
        self.publish();

        loop {
            tokio::select! {
                action = self.actions.recv() => match action {
                    Some(Action::Shutdown) | None => break,
                    Some(action) => self.handle_action(action).await,
                },
                Some(event) = self.events.recv() => {
                    let effects = self.state.handle_event(event);
                    self.execute(effects);
                }
                Some(completion) = self.completions.recv() => self.complete(completion),
                Ok(()) = self.connection_state.changed() => {}
            }
            self.publish();
        }

        self.connection.disconnect();
        self.publish();
        info!("chat session stopped");
    }

    async fn handle_action(&mut self, action: Action) {
        let effects = match action {
            Action::Connect { credentials, reply } => {
                let result = self.connection.connect(&credentials).await;
                let _ = reply.send(result);
                Vec::new()
            }
            Action::Disconnect => {
                self.connection.disconnect();
                Vec::new()
            }
            Action::Select(other) => self.state.select_conversation(other),
            Action::Close => {
                self.state.close_conversation();
                Vec::new()
            }
            Action::Send(content) => self.state.send_message(&content),
            Action::SendTo {
                receiver_id,
                content,
            } => self.state.send_to(receiver_id, &content),
            Action::ResendPending => self.state.resend_pending(),
            Action::Edit { id, content } => self.state.edit_message(id, &content),
            Action::Delete(id) => self.state.delete_message(id),
            Action::DeleteConversation(other) => self.state.delete_conversation(other),
            Action::Refresh => self.state.refresh().into_iter().collect(),
            Action::Shutdown => Vec::new(),
        };
        self.execute(effects);
    }

    fn complete(&mut self, completion: Completion) {
        match completion {
            Completion::Transcript {
                ticket,
                counterpart,
                result,
            } => self.state.transcript_loaded(ticket, counterpart, result),
            Completion::Participant { ticket, id, result } => {
                self.state.participant_loaded(ticket, id, result)
            }
            Completion::Directory { ticket, result } => {
                let follow_up = self.state.directory_refreshed(ticket, result);
                self.execute(follow_up);
            }
        }
    }

    fn execute(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Emit(command) => self.emit(command),
                Effect::FetchTranscript {
                    ticket,
                    counterpart,
                } => {
                    let api = self.api.clone();
                    let done = self.completions_tx.clone();
                    tokio::spawn(async move {
                        let result = api.fetch_transcript(counterpart).await;
                        let _ = done.send(Completion::Transcript {
                            ticket,
                            counterpart,
                            result,
                        });
                    });
                }
                Effect::FetchParticipant { ticket, id } => {
                    let api = self.api.clone();
                    let done = self.completions_tx.clone();
                    tokio::spawn(async move {
                        let result = api.fetch_participant(id).await;
                        let _ = done.send(Completion::Participant { ticket, id, result });
                    });
                }
                Effect::RefreshDirectory(ticket) => {
                    let api = self.api.clone();
                    let done = self.completions_tx.clone();
                    tokio::spawn(async move {
                        let result = api.list_conversations().await;
                        let _ = done.send(Completion::Directory { ticket, result });
                    });
                }
            }
        }
    }

    fn emit(&self, command: ChannelCommand) {
        if self.connection.emit(command) == SendStatus::NotConnected {
            debug!("command not sent, channel is down");
        }
    }

    fn publish(&mut self) {
        let groups = self.view.project(self.state.reconciler()).to_vec();
        let directory = self.state.directory();
        let snapshot = ChatSnapshot {
            connection: self.connection.state(),
            conversations: directory.conversations().to_vec(),
            unread: directory.unread_count(),
            selected: self.state.selected(),
            participant: self.state.open_participant().cloned(),
            loading: self.state.is_loading(),
            load_failed: self.state.load_failed(),
            groups,
            pending: self.state.reconciler().pending_count(),
        };
        self.snapshots.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }
}
