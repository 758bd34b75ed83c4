//! The conversation list, one entry per counterpart.
//!
//! The list is replaced wholesale from the authoritative source on every
//! refresh and never re-sorted locally.

use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use jobchat_types::models::{ConversationSummary, MessagePreview, Participant};

use crate::error::FetchError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    pub participant: Participant,
    pub last_message: MessagePreview,
}

impl Conversation {
    pub fn other_user_id(&self) -> Uuid {
        self.participant.id
    }

    /// Unread when the preview was sent by the other side and not read yet.
    pub fn is_unread(&self, local_user: Uuid) -> bool {
        !self.last_message.read && self.last_message.sender_id != local_user
    }
}

impl From<ConversationSummary> for Conversation {
    fn from(summary: ConversationSummary) -> Self {
        Self {
            participant: summary.participant,
            last_message: summary.last_message,
        }
    }
}

/// Identifies one list fetch. Responses to older tickets than the last
/// applied one are discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct RefreshTicket(u64);

pub struct Directory {
    local_user: Uuid,
    conversations: Vec<Conversation>,
    selected: Option<Uuid>,
    issued: u64,
    applied: u64,
    in_flight: Option<RefreshTicket>,
    /// A refresh was asked for while one was in flight.
    dirty: bool,
}

impl Directory {
    pub fn new(local_user: Uuid) -> Self {
        Self {
            local_user,
            conversations: Vec::new(),
            selected: None,
            issued: 0,
            applied: 0,
            in_flight: None,
            dirty: false,
        }
    }

    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn get(&self, other_user_id: Uuid) -> Option<&Conversation> {
        self.conversations
            .iter()
            .find(|c| c.other_user_id() == other_user_id)
    }

    pub fn participant(&self, other_user_id: Uuid) -> Option<&Participant> {
        self.get(other_user_id).map(|c| &c.participant)
    }

    pub fn selected(&self) -> Option<Uuid> {
        self.selected
    }

    pub fn unread_count(&self) -> usize {
        self.conversations
            .iter()
            .filter(|c| c.is_unread(self.local_user))
            .count()
    }

    pub fn begin_refresh(&mut self) -> RefreshTicket {
        self.issued += 1;
        RefreshTicket(self.issued)
    }

    /// Coalescing front of [`Directory::begin_refresh`]: at most one list
    /// fetch is outstanding. A request made while one is in flight is
    /// remembered and answered by [`Directory::follow_up`].
    pub fn request_refresh(&mut self) -> Option<RefreshTicket> {
        if self.in_flight.is_some() {
            self.dirty = true;
            return None;
        }
        let ticket = self.begin_refresh();
        self.in_flight = Some(ticket);
        Some(ticket)
    }

    /// The single follow-up fetch owed once the outstanding one completed.
    pub fn follow_up(&mut self) -> Option<RefreshTicket> {
        if self.in_flight.is_some() || !self.dirty {
            return None;
        }
        self.dirty = false;
        self.request_refresh()
    }

    pub fn refresh_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Applies a list fetch. Returns true when the list was replaced.
    pub fn complete_refresh(
        &mut self,
        ticket: RefreshTicket,
        result: Result<Vec<ConversationSummary>, FetchError>,
    ) -> bool {
        if self.in_flight == Some(ticket) {
            self.in_flight = None;
        }
        if ticket.0 <= self.applied {
            debug!(ticket = ticket.0, applied = self.applied, "discarding superseded conversation list");
            return false;
        }
        match result {
            Ok(list) => {
                self.applied = ticket.0;
                self.replace(list);
                true
            }
            Err(e) => {
                warn!(error = %e, "conversation list refresh failed, keeping previous list");
                false
            }
        }
    }

    /// Replaces the list, preserving the server's order.
    pub fn replace(&mut self, list: Vec<ConversationSummary>) {
        self.conversations = list.into_iter().map(Conversation::from).collect();
        debug!(count = self.conversations.len(), "conversation list replaced");
    }

    pub fn select(&mut self, other_user_id: Uuid) {
        self.selected = Some(other_user_id);
    }

    pub fn clear_selection(&mut self) {
        self.selected = None;
    }

    /// Drops a conversation and clears the selection if it pointed at it.
    pub fn remove(&mut self, other_user_id: Uuid) {
        self.conversations
            .retain(|c| c.other_user_id() != other_user_id);
        if self.selected == Some(other_user_id) {
            self.selected = None;
        }
    }

    /// Optimistic preview patch after a local send. Position is left alone;
    /// the refresh that always follows brings the authoritative order.
    pub fn note_outgoing(&mut self, receiver_id: Uuid, content: &str, at: DateTime<Utc>) {
        let local_user = self.local_user;
        if let Some(conversation) = self
            .conversations
            .iter_mut()
            .find(|c| c.other_user_id() == receiver_id)
        {
            conversation.last_message = MessagePreview {
                content: content.to_string(),
                created_at: at,
                read: false,
                sender_id: local_user,
            };
        }
    }
}
