//! Merge of optimistic sends, server echoes and inbound edit/delete events
//! into the transcript of the open conversation.
//!
//! The reconciler is the only writer of the transcript. It is a plain
//! synchronous state machine; the session feeds it events one at a time.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

use jobchat_types::events::ChannelCommand;
use jobchat_types::models::ChatMessage;

use crate::error::{EditRejected, StaleEventError};
use crate::matching;
use crate::message::{LocalId, LocalIdGenerator, Message, PendingMessage};

/// What an applied event did to the transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// A pending entry was replaced by its confirmed copy, same position.
    Confirmed { index: usize },
    /// A confirmed message with no pending counterpart was appended.
    Appended { index: usize },
    /// An existing confirmed message changed in place.
    Updated { index: usize },
    /// A message left the transcript.
    Removed { index: usize },
    /// A redelivered echo named a pending copy that the fetched transcript
    /// had already confirmed; the leftover copy was removed.
    Deduplicated { index: usize },
    /// The echo confirmed a parked send of a conversation that is not open.
    ParkedConfirmed,
    /// Already applied, nothing changed.
    Duplicate,
}

pub struct Reconciler {
    local_user: Uuid,
    counterpart: Option<Uuid>,
    transcript: Vec<Message>,
    /// Unconfirmed sends of conversations that are not open, kept so that
    /// switching conversations never loses a pending message.
    parked: HashMap<Uuid, Vec<PendingMessage>>,
    ids: LocalIdGenerator,
    revision: u64,
}

impl Reconciler {
    pub fn new(local_user: Uuid) -> Self {
        Self {
            local_user,
            counterpart: None,
            transcript: Vec::new(),
            parked: HashMap::new(),
            ids: LocalIdGenerator::new(),
            revision: 0,
        }
    }

    pub fn local_user(&self) -> Uuid {
        self.local_user
    }

    /// Counterpart of the open transcript.
    pub fn counterpart(&self) -> Option<Uuid> {
        self.counterpart
    }

    pub fn transcript(&self) -> &[Message] {
        &self.transcript
    }

    /// Bumped on every transcript mutation.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn pending_count(&self) -> usize {
        self.transcript.iter().filter(|m| m.is_pending()).count()
    }

    pub fn parked(&self, counterpart: Uuid) -> &[PendingMessage] {
        self.parked
            .get(&counterpart)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Send commands for every unconfirmed message, open or parked. They
    /// carry the original correlation ids, so the server can recognise a
    /// resend of something it already stored.
    pub fn pending_commands(&self) -> Vec<ChannelCommand> {
        let open = self.transcript.iter().filter_map(|m| match m {
            Message::Pending(p) => Some(p),
            Message::Confirmed(_) => None,
        });
        open.chain(self.parked.values().flatten())
            .map(|p| ChannelCommand::Send {
                receiver_id: p.receiver_id,
                content: p.content.clone(),
                client_ref: Some(p.local_id.to_string()),
            })
            .collect()
    }

    /// Opens the transcript for `counterpart`, restoring its parked sends.
    pub fn open(&mut self, counterpart: Uuid) {
        self.close();
        self.transcript = self
            .parked
            .remove(&counterpart)
            .unwrap_or_default()
            .into_iter()
            .map(Message::Pending)
            .collect();
        self.counterpart = Some(counterpart);
        self.touch();
    }

    /// Discards the open transcript. Pending entries are parked, not lost.
    pub fn close(&mut self) {
        if let Some(previous) = self.counterpart.take() {
            let pending: Vec<PendingMessage> = self
                .transcript
                .drain(..)
                .filter_map(|m| match m {
                    Message::Pending(p) => Some(p),
                    Message::Confirmed(_) => None,
                })
                .collect();
            if !pending.is_empty() {
                self.parked.entry(previous).or_default().extend(pending);
            }
        }
        self.transcript.clear();
        self.touch();
    }

    /// Records an optimistic send and returns the command to emit.
    pub fn send(&mut self, receiver_id: Uuid, content: impl Into<String>) -> (LocalId, ChannelCommand) {
        let local_id = self.ids.next_id();
        let pending = PendingMessage {
            local_id,
            sender_id: self.local_user,
            receiver_id,
            content: content.into(),
            created_at: Utc::now(),
        };
        let command = ChannelCommand::Send {
            receiver_id,
            content: pending.content.clone(),
            client_ref: Some(local_id.to_string()),
        };

        if self.counterpart == Some(receiver_id) {
            self.transcript.push(Message::Pending(pending));
            self.touch();
        } else {
            self.parked.entry(receiver_id).or_default().push(pending);
        }

        (local_id, command)
    }

    /// Replaces the confirmed part of the transcript with a fetch result,
    /// keeping sends that are still unconfirmed.
    pub fn load(&mut self, counterpart: Uuid, fetched: Vec<ChatMessage>) -> Result<usize, StaleEventError> {
        if self.counterpart != Some(counterpart) {
            return Err(StaleEventError::OtherConversation { counterpart });
        }

        let pending: Vec<PendingMessage> = self
            .transcript
            .drain(..)
            .filter_map(|m| match m {
                Message::Pending(p) => Some(p),
                Message::Confirmed(_) => None,
            })
            .collect();

        let mut seen = HashSet::new();
        let mut transcript = Vec::with_capacity(fetched.len() + pending.len());
        for msg in fetched {
            match self.classify(&msg) {
                Ok(other) if other == counterpart => {}
                Ok(other) => {
                    warn!(message_id = %msg.id, %other, "fetched message belongs to another conversation, dropping");
                    continue;
                }
                Err(e) => {
                    warn!(error = %e, "dropping malformed fetched message");
                    continue;
                }
            }
            if seen.insert(msg.id) {
                transcript.push(Message::Confirmed(msg));
            }
        }

        for p in pending {
            let already_confirmed = transcript.iter().any(|m| match m {
                Message::Confirmed(c) => c
                    .client_ref
                    .as_deref()
                    .is_some_and(|r| p.local_id.matches_ref(r)),
                Message::Pending(_) => false,
            });
            if already_confirmed {
                debug!(local_id = %p.local_id, "pending send already present in fetched transcript");
            } else {
                transcript.push(Message::Pending(p));
            }
        }

        self.transcript = transcript;
        self.touch();
        Ok(self.transcript.len())
    }

    pub fn apply_created(&mut self, msg: ChatMessage) -> Result<Applied, StaleEventError> {
        let counterpart = self.classify(&msg)?;
        if self.counterpart != Some(counterpart) {
            return self.confirm_parked(counterpart, &msg);
        }

        if self.position_of(msg.id).is_some() {
            if msg.sender_id == self.local_user {
                if let Some(index) = msg
                    .client_ref
                    .as_deref()
                    .and_then(|r| matching::find_by_ref(&self.transcript, r))
                {
                    self.transcript.remove(index);
                    self.touch();
                    return Ok(Applied::Deduplicated { index });
                }
            }
            return Ok(Applied::Duplicate);
        }

        if msg.sender_id == self.local_user {
            if let Some(index) = matching::find_pending_for_echo(&self.transcript, &msg) {
                self.transcript[index] = Message::Confirmed(msg);
                self.touch();
                return Ok(Applied::Confirmed { index });
            }
        }

        self.transcript.push(Message::Confirmed(msg));
        self.touch();
        Ok(Applied::Appended {
            index: self.transcript.len() - 1,
        })
    }

    /// Applies an edit or read receipt in place. Edits and reads never revert.
    pub fn apply_updated(&mut self, msg: ChatMessage) -> Result<Applied, StaleEventError> {
        let counterpart = self.classify(&msg)?;
        if self.counterpart != Some(counterpart) {
            return Err(StaleEventError::OtherConversation { counterpart });
        }

        let index = self
            .position_of(msg.id)
            .ok_or(StaleEventError::UnknownMessage(msg.id))?;

        let Message::Confirmed(existing) = &mut self.transcript[index] else {
            return Err(StaleEventError::UnknownMessage(msg.id));
        };

        // An unedited copy (`updated_at: None`) is older than any edit, so a
        // late read receipt carrying pre-edit content keeps the edit.
        let newer_or_same = msg.updated_at >= existing.updated_at;
        let content = if newer_or_same { msg.content } else { existing.content.clone() };
        let updated_at = existing.updated_at.max(msg.updated_at);
        let read = existing.read || msg.read;
        if existing.content == content && existing.updated_at == updated_at && existing.read == read {
            return Ok(Applied::Duplicate);
        }

        existing.content = content;
        existing.updated_at = updated_at;
        existing.read = read;
        self.touch();
        Ok(Applied::Updated { index })
    }

    pub fn apply_deleted(&mut self, id: Uuid) -> Result<Applied, StaleEventError> {
        let index = self
            .position_of(id)
            .ok_or(StaleEventError::UnknownMessage(id))?;
        self.transcript.remove(index);
        self.touch();
        Ok(Applied::Removed { index })
    }

    /// Validates a local edit and returns the command to emit. The new
    /// content lands through the `MessageUpdated` echo.
    pub fn edit(&self, id: Uuid, content: &str) -> Result<ChannelCommand, EditRejected> {
        if content.trim().is_empty() {
            return Err(EditRejected::EmptyContent);
        }
        let index = self.position_of(id).ok_or(EditRejected::UnknownMessage(id))?;
        if self.transcript[index].sender_id() != self.local_user {
            return Err(EditRejected::NotOwnMessage(id));
        }
        Ok(ChannelCommand::Update {
            id,
            content: content.to_string(),
        })
    }

    /// Removes one of the local user's messages and returns the command to
    /// emit. Unknown ids are a no-op.
    pub fn delete(&mut self, id: Uuid) -> Option<ChannelCommand> {
        let index = self.position_of(id)?;
        if self.transcript[index].sender_id() != self.local_user {
            debug!(message_id = %id, "refusing to delete someone else's message");
            return None;
        }
        self.transcript.remove(index);
        self.touch();
        Some(ChannelCommand::Delete { id })
    }

    /// Drops the conversation locally and returns the command to emit,
    /// plus whether the open transcript was the one cleared.
    pub fn delete_conversation(&mut self, other_user_id: Uuid) -> (ChannelCommand, bool) {
        let cleared = self.drop_conversation(other_user_id);
        (ChannelCommand::DeleteConversation { other_user_id }, cleared)
    }

    /// Returns true when the open transcript was cleared.
    pub fn apply_conversation_deleted(&mut self, other_user_id: Uuid) -> bool {
        self.drop_conversation(other_user_id)
    }

    fn drop_conversation(&mut self, other_user_id: Uuid) -> bool {
        self.parked.remove(&other_user_id);
        if self.counterpart == Some(other_user_id) {
            self.counterpart = None;
            self.transcript.clear();
            self.touch();
            true
        } else {
            false
        }
    }

    fn confirm_parked(&mut self, counterpart: Uuid, msg: &ChatMessage) -> Result<Applied, StaleEventError> {
        if msg.sender_id == self.local_user {
            if let Some(parked) = self.parked.get_mut(&counterpart) {
                if let Some(index) = matching::find_parked_for_echo(parked, msg) {
                    parked.remove(index);
                    if parked.is_empty() {
                        self.parked.remove(&counterpart);
                    }
                    return Ok(Applied::ParkedConfirmed);
                }
            }
        }
        Err(StaleEventError::OtherConversation { counterpart })
    }

    /// Counterpart of `msg` from the local user's point of view.
    fn classify(&self, msg: &ChatMessage) -> Result<Uuid, StaleEventError> {
        if msg.id.is_nil() {
            return Err(StaleEventError::Malformed("missing message id"));
        }
        msg.counterpart_of(self.local_user)
            .ok_or(StaleEventError::Malformed("message does not involve the local user"))
    }

    fn position_of(&self, id: Uuid) -> Option<usize> {
        self.transcript
            .iter()
            .position(|m| m.server_id() == Some(id))
    }

    fn touch(&mut self) {
        self.revision = self.revision.wrapping_add(1);
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    const ME: Uuid = Uuid::from_u128(1);
    const BOB: Uuid = Uuid::from_u128(2);
    const CAROL: Uuid = Uuid::from_u128(3);

    fn server_copy(command: &ChannelCommand, sender: Uuid, with_ref: bool) -> ChatMessage {
        let ChannelCommand::Send {
            receiver_id,
            content,
            client_ref,
        } = command
        else {
            panic!("not a send: {command:?}");
        };
        ChatMessage {
            id: Uuid::new_v4(),
            sender_id: sender,
            receiver_id: *receiver_id,
            content: content.clone(),
            created_at: Utc::now(),
            updated_at: None,
            read: false,
            client_ref: if with_ref { client_ref.clone() } else { None },
        }
    }

    fn inbound(from: Uuid, content: &str) -> ChatMessage {
        ChatMessage {
            id: Uuid::new_v4(),
            sender_id: from,
            receiver_id: ME,
            content: content.into(),
            created_at: Utc::now(),
            updated_at: None,
            read: false,
            client_ref: None,
        }
    }

    fn open_with_bob() -> Reconciler {
        let mut r = Reconciler::new(ME);
        r.open(BOB);
        r
    }

    #[test]
    fn send_inserts_pending_immediately() {
        let mut r = open_with_bob();
        let (local_id, command) = r.send(BOB, "hi");

        assert_eq!(r.transcript().len(), 1);
        assert_eq!(r.transcript()[0].local_id(), Some(local_id));
        assert!(r.transcript()[0].is_pending());
        match command {
            ChannelCommand::Send { client_ref, .. } => {
                assert_eq!(client_ref, Some(local_id.to_string()));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn echo_replaces_pending_in_place() {
        let mut r = open_with_bob();
        let (_, cmd) = r.send(BOB, "first");
        r.apply_created(inbound(BOB, "reply")).unwrap();
        let echo = server_copy(&cmd, ME, true);
        let echo_id = echo.id;

        assert_eq!(r.apply_created(echo).unwrap(), Applied::Confirmed { index: 0 });
        assert_eq!(r.transcript().len(), 2);
        assert_eq!(r.transcript()[0].server_id(), Some(echo_id));
        assert_eq!(r.pending_count(), 0);
    }

    #[test]
    fn duplicate_echo_is_a_no_op() {
        let mut r = open_with_bob();
        let (_, cmd) = r.send(BOB, "hi");
        let echo = server_copy(&cmd, ME, true);

        r.apply_created(echo.clone()).unwrap();
        let revision = r.revision();
        assert_eq!(r.apply_created(echo).unwrap(), Applied::Duplicate);
        assert_eq!(r.transcript().len(), 1);
        assert_eq!(r.revision(), revision);
    }

    #[test]
    fn identical_rapid_sends_pair_oldest_first_without_correlation() {
        let mut r = open_with_bob();
        let (first, cmd1) = r.send(BOB, "ok");
        let (second, cmd2) = r.send(BOB, "ok");
        let echo1 = server_copy(&cmd1, ME, false);
        let echo2 = server_copy(&cmd2, ME, false);
        let (id1, id2) = (echo1.id, echo2.id);

        assert_eq!(r.apply_created(echo1).unwrap(), Applied::Confirmed { index: 0 });
        assert_eq!(r.transcript()[1].local_id(), Some(second));
        assert_ne!(r.transcript()[1].local_id(), Some(first));
        assert_eq!(r.apply_created(echo2).unwrap(), Applied::Confirmed { index: 1 });

        let ids: Vec<_> = r.transcript().iter().map(Message::server_id).collect();
        assert_eq!(ids, vec![Some(id1), Some(id2)]);
    }

    #[test]
    fn confirmation_order_is_preserved() {
        let mut r = open_with_bob();
        let (_, a) = r.send(BOB, "a");
        r.apply_created(inbound(BOB, "interleaved")).unwrap();
        let (_, b) = r.send(BOB, "b");

        r.apply_created(server_copy(&a, ME, true)).unwrap();
        r.apply_created(server_copy(&b, ME, true)).unwrap();

        let contents: Vec<_> = r.transcript().iter().map(Message::content).collect();
        assert_eq!(contents, vec!["a", "interleaved", "b"]);
    }

    #[test]
    fn echo_from_another_device_is_appended() {
        let mut r = open_with_bob();
        let mut msg = inbound(BOB, "sent elsewhere");
        msg.sender_id = ME;
        msg.receiver_id = BOB;
        assert_eq!(r.apply_created(msg).unwrap(), Applied::Appended { index: 0 });
    }

    #[test]
    fn update_for_unknown_id_inserts_nothing() {
        let mut r = open_with_bob();
        let ghost = inbound(BOB, "edited");
        let id = ghost.id;
        assert_eq!(
            r.apply_updated(ghost),
            Err(StaleEventError::UnknownMessage(id))
        );
        assert!(r.transcript().is_empty());
    }

    #[test]
    fn update_edits_in_place_and_never_reverts() {
        let mut r = open_with_bob();
        let original = inbound(BOB, "draft");
        r.apply_created(original.clone()).unwrap();

        let mut edited = original.clone();
        edited.content = "final".into();
        edited.updated_at = Some(original.created_at + Duration::seconds(5));
        edited.read = true;
        assert_eq!(r.apply_updated(edited.clone()).unwrap(), Applied::Updated { index: 0 });

        let mut late = original.clone();
        late.content = "final".into();
        r.apply_updated(late).unwrap();

        let entry = &r.transcript()[0];
        assert_eq!(entry.content(), "final");
        assert!(entry.is_edited());
        assert!(entry.is_read());
    }

    #[test]
    fn late_receipt_with_pre_edit_content_keeps_the_edit() {
        let mut r = open_with_bob();
        let original = inbound(BOB, "draft");
        r.apply_created(original.clone()).unwrap();

        let mut edited = original.clone();
        edited.content = "final".into();
        edited.updated_at = Some(original.created_at + Duration::seconds(5));
        r.apply_updated(edited).unwrap();

        // Receipt snapshotted before the edit, delivered after it.
        let mut receipt = original.clone();
        receipt.read = true;
        assert_eq!(r.apply_updated(receipt).unwrap(), Applied::Updated { index: 0 });

        let entry = &r.transcript()[0];
        assert_eq!(entry.content(), "final");
        assert!(entry.is_edited());
        assert!(entry.is_read());
    }

    #[test]
    fn later_edit_replaces_earlier_one() {
        let mut r = open_with_bob();
        let original = inbound(BOB, "v1");
        r.apply_created(original.clone()).unwrap();

        let mut second = original.clone();
        second.content = "v2".into();
        second.updated_at = Some(original.created_at + Duration::seconds(1));
        let mut third = original.clone();
        third.content = "v3".into();
        third.updated_at = Some(original.created_at + Duration::seconds(2));

        r.apply_updated(third).unwrap();
        assert_eq!(r.apply_updated(second).unwrap(), Applied::Duplicate);
        assert_eq!(r.transcript()[0].content(), "v3");
    }

    #[test]
    fn delete_is_idempotent() {
        let mut r = open_with_bob();
        let msg = inbound(BOB, "bye");
        let id = msg.id;
        r.apply_created(msg).unwrap();
        r.apply_created(inbound(BOB, "stays")).unwrap();

        assert_eq!(r.apply_deleted(id).unwrap(), Applied::Removed { index: 0 });
        let after_first = r.transcript().to_vec();
        assert!(r.apply_deleted(id).is_err());
        assert_eq!(r.transcript(), after_first.as_slice());
    }

    #[test]
    fn local_delete_only_touches_own_confirmed_messages() {
        let mut r = open_with_bob();
        let theirs = inbound(BOB, "theirs");
        let theirs_id = theirs.id;
        r.apply_created(theirs).unwrap();
        let (_, cmd) = r.send(BOB, "mine");
        let echo = server_copy(&cmd, ME, true);
        let mine_id = echo.id;
        r.apply_created(echo).unwrap();

        assert_eq!(r.delete(theirs_id), None);
        assert_eq!(r.delete(mine_id), Some(ChannelCommand::Delete { id: mine_id }));
        assert_eq!(r.delete(mine_id), None);
        assert_eq!(r.transcript().len(), 1);
    }

    #[test]
    fn edit_rules() {
        let mut r = open_with_bob();
        let theirs = inbound(BOB, "theirs");
        let theirs_id = theirs.id;
        r.apply_created(theirs).unwrap();
        let (_, cmd) = r.send(BOB, "mine");
        let echo = server_copy(&cmd, ME, true);
        let mine_id = echo.id;
        r.apply_created(echo).unwrap();

        assert_eq!(r.edit(theirs_id, "x"), Err(EditRejected::NotOwnMessage(theirs_id)));
        assert_eq!(r.edit(mine_id, "  "), Err(EditRejected::EmptyContent));
        let unknown = Uuid::new_v4();
        assert_eq!(r.edit(unknown, "x"), Err(EditRejected::UnknownMessage(unknown)));
        assert_eq!(
            r.edit(mine_id, "fixed"),
            Ok(ChannelCommand::Update {
                id: mine_id,
                content: "fixed".into()
            })
        );
        // Not applied until the echo arrives.
        assert_eq!(r.transcript()[1].content(), "mine");
    }

    #[test]
    fn message_for_other_conversation_is_not_inserted() {
        let mut r = open_with_bob();
        let err = r.apply_created(inbound(CAROL, "psst")).unwrap_err();
        assert_eq!(err, StaleEventError::OtherConversation { counterpart: CAROL });
        assert!(r.transcript().is_empty());
    }

    #[test]
    fn malformed_messages_are_rejected() {
        let mut r = open_with_bob();
        let mut nil = inbound(BOB, "x");
        nil.id = Uuid::nil();
        assert!(matches!(r.apply_created(nil), Err(StaleEventError::Malformed(_))));

        let mut stranger = inbound(BOB, "x");
        stranger.receiver_id = CAROL;
        assert!(matches!(
            r.apply_created(stranger),
            Err(StaleEventError::Malformed(_))
        ));
        assert!(r.transcript().is_empty());
    }

    #[test]
    fn switching_conversations_parks_pending_sends() {
        let mut r = open_with_bob();
        r.send(BOB, "waiting");
        r.open(CAROL);
        assert!(r.transcript().is_empty());
        assert_eq!(r.parked(BOB).len(), 1);

        r.open(BOB);
        assert_eq!(r.pending_count(), 1);
        assert_eq!(r.transcript()[0].content(), "waiting");
    }

    #[test]
    fn echo_for_parked_send_clears_it() {
        let mut r = open_with_bob();
        let (_, cmd) = r.send(BOB, "waiting");
        r.open(CAROL);

        let applied = r.apply_created(server_copy(&cmd, ME, true)).unwrap();
        assert_eq!(applied, Applied::ParkedConfirmed);
        assert!(r.parked(BOB).is_empty());
        assert!(r.transcript().is_empty());
    }

    #[test]
    fn send_to_closed_conversation_is_parked() {
        let mut r = open_with_bob();
        r.send(CAROL, "hello carol");
        assert!(r.transcript().is_empty());
        assert_eq!(r.parked(CAROL).len(), 1);
    }

    #[test]
    fn pending_commands_reuse_original_refs() {
        let mut r = open_with_bob();
        let (open_id, _) = r.send(BOB, "open");
        let (parked_id, _) = r.send(CAROL, "parked");

        let refs: Vec<_> = r
            .pending_commands()
            .into_iter()
            .map(|c| match c {
                ChannelCommand::Send { client_ref, .. } => client_ref.unwrap(),
                other => panic!("unexpected command {other:?}"),
            })
            .collect();
        assert_eq!(refs, vec![open_id.to_string(), parked_id.to_string()]);
    }

    #[test]
    fn load_keeps_unconfirmed_sends_after_history() {
        let mut r = open_with_bob();
        r.send(BOB, "typed during load");
        let history = vec![inbound(BOB, "old 1"), inbound(BOB, "old 2")];

        assert_eq!(r.load(BOB, history).unwrap(), 3);
        let contents: Vec<_> = r.transcript().iter().map(Message::content).collect();
        assert_eq!(contents, vec!["old 1", "old 2", "typed during load"]);
        assert!(r.transcript()[2].is_pending());
    }

    #[test]
    fn load_then_replayed_echo_leaves_one_copy() {
        let mut r = open_with_bob();
        let (_, cmd) = r.send(BOB, "raced");
        let echo = server_copy(&cmd, ME, true);

        // The fetch already contains the persisted copy.
        r.load(BOB, vec![echo.clone()]).unwrap();
        assert_eq!(r.transcript().len(), 1);
        assert!(!r.transcript()[0].is_pending());

        assert_eq!(r.apply_created(echo).unwrap(), Applied::Duplicate);
        assert_eq!(r.transcript().len(), 1);
    }

    #[test]
    fn load_drops_duplicates_and_foreign_rows() {
        let mut r = open_with_bob();
        let a = inbound(BOB, "a");
        let foreign = inbound(CAROL, "not ours");
        r.load(BOB, vec![a.clone(), a, foreign]).unwrap();
        assert_eq!(r.transcript().len(), 1);
    }

    #[test]
    fn load_for_closed_conversation_is_stale() {
        let mut r = open_with_bob();
        r.apply_created(inbound(BOB, "keep me")).unwrap();
        let err = r.load(CAROL, vec![inbound(CAROL, "late")]).unwrap_err();
        assert_eq!(err, StaleEventError::OtherConversation { counterpart: CAROL });
        assert_eq!(r.transcript()[0].content(), "keep me");
    }

    #[test]
    fn conversation_deletion_clears_open_transcript() {
        let mut r = open_with_bob();
        r.send(BOB, "pending");
        r.send(CAROL, "parked");

        assert!(!r.apply_conversation_deleted(CAROL));
        assert!(r.parked(CAROL).is_empty());
        assert_eq!(r.transcript().len(), 1);

        let (cmd, cleared) = r.delete_conversation(BOB);
        assert!(cleared);
        assert_eq!(cmd, ChannelCommand::DeleteConversation { other_user_id: BOB });
        assert!(r.transcript().is_empty());
        assert_eq!(r.counterpart(), None);
    }
}
