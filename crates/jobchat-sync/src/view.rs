//! Render projection of a transcript: sender clustering and badges.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::message::{Message, MessageKey};
use crate::reconciler::Reconciler;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRow {
    pub key: MessageKey,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub pending: bool,
    pub edited: bool,
    pub read: bool,
}

/// Consecutive messages from one sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageGroup {
    pub sender_id: Uuid,
    pub is_own: bool,
    pub rows: Vec<MessageRow>,
}

pub fn group_transcript(transcript: &[Message], local_user: Uuid) -> Vec<MessageGroup> {
    let mut groups: Vec<MessageGroup> = Vec::new();

    for message in transcript {
        let row = MessageRow {
            key: message.key(),
            content: message.content().to_string(),
            created_at: message.created_at(),
            pending: message.is_pending(),
            edited: message.is_edited(),
            read: message.is_read(),
        };

        match groups.last_mut() {
            Some(group) if group.sender_id == message.sender_id() => group.rows.push(row),
            _ => groups.push(MessageGroup {
                sender_id: message.sender_id(),
                is_own: message.sender_id() == local_user,
                rows: vec![row],
            }),
        }
    }

    groups
}

/// Memoized [`group_transcript`], recomputed only when the reconciler's
/// revision or open conversation changes.
#[derive(Debug, Default)]
pub struct TranscriptView {
    stamp: Option<(u64, Option<Uuid>)>,
    groups: Vec<MessageGroup>,
}

impl TranscriptView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn project(&mut self, reconciler: &Reconciler) -> &[MessageGroup] {
        let stamp = (reconciler.revision(), reconciler.counterpart());
        if self.stamp != Some(stamp) {
            self.groups = group_transcript(reconciler.transcript(), reconciler.local_user());
            self.stamp = Some(stamp);
        }
        &self.groups
    }
}

#[cfg(test)]
mod tests {
    use jobchat_types::models::ChatMessage;

    use super::*;

    const ME: Uuid = Uuid::from_u128(1);
    const BOB: Uuid = Uuid::from_u128(2);

    fn from(sender: Uuid, content: &str) -> ChatMessage {
        ChatMessage {
            id: Uuid::new_v4(),
            sender_id: sender,
            receiver_id: if sender == ME { BOB } else { ME },
            content: content.into(),
            created_at: Utc::now(),
            updated_at: None,
            read: false,
            client_ref: None,
        }
    }

    #[test]
    fn consecutive_messages_cluster_by_sender() {
        let transcript = vec![
            Message::Confirmed(from(BOB, "a")),
            Message::Confirmed(from(BOB, "b")),
            Message::Confirmed(from(ME, "c")),
            Message::Confirmed(from(BOB, "d")),
        ];
        let groups = group_transcript(&transcript, ME);
        let shape: Vec<_> = groups.iter().map(|g| (g.is_own, g.rows.len())).collect();
        assert_eq!(shape, vec![(false, 2), (true, 1), (false, 1)]);
    }

    #[test]
    fn badges_follow_message_state() {
        let mut edited = from(ME, "fixed");
        edited.updated_at = Some(Utc::now());
        edited.read = true;

        let mut r = Reconciler::new(ME);
        r.open(BOB);
        r.apply_created(edited).unwrap();
        r.send(BOB, "sending");

        let groups = group_transcript(r.transcript(), ME);
        assert_eq!(groups.len(), 1);
        let rows = &groups[0].rows;
        assert!(rows[0].edited && rows[0].read && !rows[0].pending);
        assert!(rows[1].pending && !rows[1].read && !rows[1].edited);
    }

    #[test]
    fn empty_transcript_projects_to_nothing() {
        assert!(group_transcript(&[], ME).is_empty());
    }

    #[test]
    fn projection_is_memoized_by_revision() {
        let mut r = Reconciler::new(ME);
        r.open(BOB);
        let mut view = TranscriptView::new();
        assert!(view.project(&r).is_empty());

        r.apply_created(from(BOB, "hello")).unwrap();
        assert_eq!(view.project(&r).len(), 1);
        assert_eq!(view.project(&r)[0].rows[0].content, "hello");
    }
}
