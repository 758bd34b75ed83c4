use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A chat party as returned by the participant and conversation endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

impl Participant {
    /// "First Last", or the id when both name parts are blank.
    pub fn display_name(&self) -> String {
        let name = format!("{} {}", self.first_name.trim(), self.last_name.trim());
        let name = name.trim();
        if name.is_empty() {
            self.id.to_string()
        } else {
            name.to_string()
        }
    }
}

/// A direct message as the server knows it.
///
/// `updated_at` is only present once the message has been edited.
/// `client_ref` carries the sender's local correlation id back on the echo
/// of a send; it is `None` for messages created by older clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub read: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ref: Option<String>,
}

impl ChatMessage {
    /// The other party of this message from `user`'s point of view.
    /// Returns `None` when `user` is neither sender nor receiver.
    pub fn counterpart_of(&self, user: Uuid) -> Option<Uuid> {
        if self.sender_id == user {
            Some(self.receiver_id)
        } else if self.receiver_id == user {
            Some(self.sender_id)
        } else {
            None
        }
    }

    pub fn is_edited(&self) -> bool {
        self.updated_at.is_some()
    }

    pub fn preview(&self) -> MessagePreview {
        MessagePreview {
            content: self.content.clone(),
            created_at: self.created_at,
            read: self.read,
            sender_id: self.sender_id,
        }
    }
}

/// Snapshot of the most recent message of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePreview {
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub read: bool,
    pub sender_id: Uuid,
}

/// One row of the authoritative conversation list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub participant: Participant,
    pub last_message: MessagePreview,
}
