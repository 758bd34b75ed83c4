use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::ChatMessage;

/// Events sent FROM server TO client over the real-time channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ChannelEvent {
    /// A message was persisted. Also the echo of the recipient's own sends.
    MessageCreated(ChatMessage),

    /// Content or read state of an existing message changed
    MessageUpdated(ChatMessage),

    /// A message was removed
    MessageDeleted { id: Uuid },

    /// The whole conversation with `other_user_id` was removed.
    /// `other_user_id` is relative to the client receiving the event.
    ConversationDeleted { other_user_id: Uuid },
}

/// Discriminant of [`ChannelEvent`], used as the handler registration key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    MessageCreated,
    MessageUpdated,
    MessageDeleted,
    ConversationDeleted,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [
        EventKind::MessageCreated,
        EventKind::MessageUpdated,
        EventKind::MessageDeleted,
        EventKind::ConversationDeleted,
    ];
}

impl ChannelEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::MessageCreated(_) => EventKind::MessageCreated,
            Self::MessageUpdated(_) => EventKind::MessageUpdated,
            Self::MessageDeleted { .. } => EventKind::MessageDeleted,
            Self::ConversationDeleted { .. } => EventKind::ConversationDeleted,
        }
    }
}

/// Commands sent FROM client TO server over the real-time channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ChannelCommand {
    /// Post a new message. `client_ref` is echoed back on `MessageCreated`.
    Send {
        receiver_id: Uuid,
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_ref: Option<String>,
    },

    /// Replace the content of one of the caller's messages
    Update { id: Uuid, content: String },

    /// Remove one of the caller's messages
    Delete { id: Uuid },

    /// Remove every message exchanged with `other_user_id`
    DeleteConversation { other_user_id: Uuid },
}
