//! Session state machine tying the reconciler and the directory to the
//! selected conversation.
//!
//! `ChatState` performs no I/O. Every operation mutates local state and
//! returns the [`Effect`]s the runtime has to carry out; results come back
//! in through [`ChatState::transcript_loaded`], [`ChatState::participant_loaded`]
//! and [`ChatState::directory_refreshed`].

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use jobchat_types::events::{ChannelCommand, ChannelEvent};
use jobchat_types::models::{ChatMessage, ConversationSummary, Participant};

use crate::directory::{Directory, RefreshTicket};
use crate::error::{FetchError, StaleEventError};
use crate::reconciler::Reconciler;

/// Identifies the transcript load of one selection. Results carrying an
/// older ticket belong to a conversation that is no longer selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadTicket(u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Emit(ChannelCommand),
    FetchTranscript { ticket: LoadTicket, counterpart: Uuid },
    FetchParticipant { ticket: LoadTicket, id: Uuid },
    RefreshDirectory(RefreshTicket),
}

#[derive(Debug)]
enum LoadPhase {
    /// Fetch in flight. Events for the conversation wait here so the fetch
    /// result cannot overwrite them.
    Loading { buffered: Vec<ChannelEvent> },
    Ready,
    Failed,
}

#[derive(Debug)]
struct OpenConversation {
    counterpart: Uuid,
    ticket: LoadTicket,
    participant: Option<Participant>,
    phase: LoadPhase,
}

pub struct ChatState {
    reconciler: Reconciler,
    directory: Directory,
    open: Option<OpenConversation>,
    next_ticket: u64,
}

impl ChatState {
    pub fn new(local_user: Uuid) -> Self {
        Self {
            reconciler: Reconciler::new(local_user),
            directory: Directory::new(local_user),
            open: None,
            next_ticket: 0,
        }
    }

    pub fn local_user(&self) -> Uuid {
        self.reconciler.local_user()
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    pub fn selected(&self) -> Option<Uuid> {
        self.open.as_ref().map(|o| o.counterpart)
    }

    pub fn is_loading(&self) -> bool {
        matches!(
            self.open,
            Some(OpenConversation {
                phase: LoadPhase::Loading { .. },
                ..
            })
        )
    }

    /// True when the last transcript fetch for the open conversation failed.
    pub fn load_failed(&self) -> bool {
        matches!(
            self.open,
            Some(OpenConversation {
                phase: LoadPhase::Failed,
                ..
            })
        )
    }

    /// Profile of the open counterpart, from the directory or a dedicated fetch.
    pub fn open_participant(&self) -> Option<&Participant> {
        let open = self.open.as_ref()?;
        open.participant
            .as_ref()
            .or_else(|| self.directory.participant(open.counterpart))
    }

    /// Initial work after the session starts.
    pub fn start(&mut self) -> Vec<Effect> {
        self.refresh().into_iter().collect()
    }

    /// Asks for a list fetch. None when one is already outstanding; the
    /// request is then folded into the follow-up issued on its completion.
    pub fn refresh(&mut self) -> Option<Effect> {
        self.directory
            .request_refresh()
            .map(Effect::RefreshDirectory)
    }

    fn then_refresh(&mut self, mut effects: Vec<Effect>) -> Vec<Effect> {
        effects.extend(self.refresh());
        effects
    }

    pub fn select_conversation(&mut self, other_user_id: Uuid) -> Vec<Effect> {
        self.next_ticket += 1;
        let ticket = LoadTicket(self.next_ticket);

        self.directory.select(other_user_id);
        self.reconciler.open(other_user_id);

        let participant = self.directory.participant(other_user_id).cloned();
        let mut effects = vec![Effect::FetchTranscript {
            ticket,
            counterpart: other_user_id,
        }];
        if participant.is_none() {
            effects.push(Effect::FetchParticipant {
                ticket,
                id: other_user_id,
            });
        }

        self.open = Some(OpenConversation {
            counterpart: other_user_id,
            ticket,
            participant,
            phase: LoadPhase::Loading {
                buffered: Vec::new(),
            },
        });
        debug!(%other_user_id, "conversation selected");
        effects
    }

    pub fn close_conversation(&mut self) {
        self.reconciler.close();
        self.directory.clear_selection();
        self.open = None;
    }

    pub fn transcript_loaded(
        &mut self,
        ticket: LoadTicket,
        counterpart: Uuid,
        result: Result<Vec<ChatMessage>, FetchError>,
    ) {
        let Some(open) = self.open.as_mut() else {
            debug!(%counterpart, "discarding transcript, no conversation open");
            return;
        };
        if open.ticket != ticket || open.counterpart != counterpart {
            debug!(%counterpart, "discarding stale transcript");
            return;
        }

        let buffered = match std::mem::replace(&mut open.phase, LoadPhase::Ready) {
            LoadPhase::Loading { buffered } => buffered,
            settled => {
                open.phase = settled;
                debug!(%counterpart, "transcript already settled");
                return;
            }
        };

        match result {
            Ok(messages) => match self.reconciler.load(counterpart, messages) {
                Ok(len) => debug!(%counterpart, len, replay = buffered.len(), "transcript loaded"),
                Err(e) => debug!(error = %e, "transcript no longer applies"),
            },
            Err(e) => {
                warn!(error = %e, %counterpart, "transcript fetch failed");
                open.phase = LoadPhase::Failed;
            }
        }

        for event in buffered {
            self.apply_event(event);
        }
    }

    pub fn participant_loaded(
        &mut self,
        ticket: LoadTicket,
        id: Uuid,
        result: Result<Participant, FetchError>,
    ) {
        let Some(open) = self.open.as_mut() else {
            return;
        };
        if open.ticket != ticket || open.counterpart != id {
            debug!(%id, "discarding stale participant");
            return;
        }
        match result {
            Ok(participant) => open.participant = Some(participant),
            Err(e) => warn!(error = %e, %id, "participant fetch failed"),
        }
    }

    /// Applies a list fetch and returns the follow-up fetch when refreshes
    /// were requested while it was outstanding.
    pub fn directory_refreshed(
        &mut self,
        ticket: RefreshTicket,
        result: Result<Vec<ConversationSummary>, FetchError>,
    ) -> Vec<Effect> {
        self.directory.complete_refresh(ticket, result);
        self.directory
            .follow_up()
            .map(Effect::RefreshDirectory)
            .into_iter()
            .collect()
    }

    /// Sends to the open conversation. No-op when nothing is open.
    pub fn send_message(&mut self, content: &str) -> Vec<Effect> {
        match self.selected() {
            Some(receiver_id) => self.send_to(receiver_id, content),
            None => {
                debug!("send ignored, no conversation open");
                Vec::new()
            }
        }
    }

    /// Sends to any counterpart; the entry is parked when its conversation
    /// is not the open one.
    pub fn send_to(&mut self, receiver_id: Uuid, content: &str) -> Vec<Effect> {
        if content.trim().is_empty() {
            debug!("send ignored, empty content");
            return Vec::new();
        }
        let (local_id, command) = self.reconciler.send(receiver_id, content);
        self.directory.note_outgoing(receiver_id, content, Utc::now());
        debug!(%local_id, %receiver_id, "queued send");
        self.then_refresh(vec![Effect::Emit(command)])
    }

    /// Re-emits every unconfirmed send with its original correlation id.
    pub fn resend_pending(&mut self) -> Vec<Effect> {
        let commands = self.reconciler.pending_commands();
        if commands.is_empty() {
            return Vec::new();
        }
        info!(count = commands.len(), "resending unconfirmed messages");
        commands.into_iter().map(Effect::Emit).collect()
    }

    pub fn edit_message(&mut self, id: Uuid, content: &str) -> Vec<Effect> {
        match self.reconciler.edit(id, content) {
            Ok(command) => self.then_refresh(vec![Effect::Emit(command)]),
            Err(e) => {
                warn!(error = %e, "edit rejected");
                Vec::new()
            }
        }
    }

    pub fn delete_message(&mut self, id: Uuid) -> Vec<Effect> {
        match self.reconciler.delete(id) {
            Some(command) => self.then_refresh(vec![Effect::Emit(command)]),
            None => Vec::new(),
        }
    }

    pub fn delete_conversation(&mut self, other_user_id: Uuid) -> Vec<Effect> {
        let (command, _) = self.reconciler.delete_conversation(other_user_id);
        self.forget_conversation(other_user_id);
        self.then_refresh(vec![Effect::Emit(command)])
    }

    /// Routes one inbound event and schedules the directory refresh that
    /// every event implies.
    pub fn handle_event(&mut self, event: ChannelEvent) -> Vec<Effect> {
        if self.should_buffer(&event) {
            if let Some(OpenConversation {
                phase: LoadPhase::Loading { buffered },
                ..
            }) = self.open.as_mut()
            {
                buffered.push(event);
            }
        } else {
            self.apply_event(event);
        }
        self.refresh().into_iter().collect()
    }

    fn should_buffer(&self, event: &ChannelEvent) -> bool {
        let Some(open) = self.open.as_ref() else {
            return false;
        };
        if !matches!(open.phase, LoadPhase::Loading { .. }) {
            return false;
        }
        match event {
            ChannelEvent::MessageCreated(msg) | ChannelEvent::MessageUpdated(msg) => {
                msg.counterpart_of(self.local_user()) == Some(open.counterpart)
            }
            ChannelEvent::MessageDeleted { .. } => true,
            ChannelEvent::ConversationDeleted { .. } => false,
        }
    }

    fn apply_event(&mut self, event: ChannelEvent) {
        let result = match event {
            ChannelEvent::MessageCreated(msg) => self.reconciler.apply_created(msg),
            ChannelEvent::MessageUpdated(msg) => self.reconciler.apply_updated(msg),
            ChannelEvent::MessageDeleted { id } => self.reconciler.apply_deleted(id),
            ChannelEvent::ConversationDeleted { other_user_id } => {
                self.reconciler.apply_conversation_deleted(other_user_id);
                self.forget_conversation(other_user_id);
                return;
            }
        };
        match result {
            Ok(applied) => debug!(?applied, "event applied"),
            Err(e @ StaleEventError::Malformed(_)) => warn!(error = %e, "ignoring event"),
            Err(e) => debug!(error = %e, "ignoring event"),
        }
    }

    fn forget_conversation(&mut self, other_user_id: Uuid) {
        self.directory.remove(other_user_id);
        if self.selected() == Some(other_user_id) {
            self.open = None;
            info!(%other_user_id, "open conversation was deleted");
        }
    }
}

#[cfg(test)]
mod tests {
    use jobchat_types::models::MessagePreview;

    use super::*;
    use crate::message::Message;

    const ME: Uuid = Uuid::from_u128(1);
    const BOB: Uuid = Uuid::from_u128(2);
    const CAROL: Uuid = Uuid::from_u128(3);

    fn message(from: Uuid, to: Uuid, content: &str) -> ChatMessage {
        ChatMessage {
            id: Uuid::new_v4(),
            sender_id: from,
            receiver_id: to,
            content: content.into(),
            created_at: Utc::now(),
            updated_at: None,
            read: false,
            client_ref: None,
        }
    }

    fn participant(id: Uuid) -> Participant {
        Participant {
            id,
            first_name: "Pat".into(),
            last_name: "Doe".into(),
            avatar_url: None,
        }
    }

    fn summary(id: Uuid) -> ConversationSummary {
        ConversationSummary {
            participant: participant(id),
            last_message: MessagePreview {
                content: "hi".into(),
                created_at: Utc::now(),
                read: true,
                sender_id: id,
            },
        }
    }

    fn transcript_fetch(effects: &[Effect]) -> (LoadTicket, Uuid) {
        effects
            .iter()
            .find_map(|e| match e {
                Effect::FetchTranscript { ticket, counterpart } => Some((*ticket, *counterpart)),
                _ => None,
            })
            .expect("transcript fetch requested")
    }

    fn emitted(effects: &[Effect]) -> Vec<&ChannelCommand> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::Emit(c) => Some(c),
                _ => None,
            })
            .collect()
    }

    fn contents(state: &ChatState) -> Vec<&str> {
        state.reconciler().transcript().iter().map(Message::content).collect()
    }

    fn echo_of(command: &ChannelCommand) -> ChatMessage {
        let ChannelCommand::Send {
            receiver_id,
            content,
            client_ref,
        } = command
        else {
            panic!("not a send: {command:?}");
        };
        let mut msg = message(ME, *receiver_id, content);
        msg.client_ref = client_ref.clone();
        msg
    }

    #[test]
    fn start_requests_the_conversation_list() {
        let mut state = ChatState::new(ME);
        assert!(matches!(state.start().as_slice(), [Effect::RefreshDirectory(_)]));
    }

    #[test]
    fn receipt_burst_costs_one_refresh_and_one_follow_up() {
        let mut state = ChatState::new(ME);
        let (ticket, _) = transcript_fetch(&state.select_conversation(BOB));
        let unread: Vec<_> = (0..5).map(|i| message(BOB, ME, &format!("m{i}"))).collect();
        state.transcript_loaded(ticket, BOB, Ok(unread.clone()));

        let mut refreshes = Vec::new();
        for mut receipt in unread {
            receipt.read = true;
            for effect in state.handle_event(ChannelEvent::MessageUpdated(receipt)) {
                if let Effect::RefreshDirectory(ticket) = effect {
                    refreshes.push(ticket);
                }
            }
        }
        assert_eq!(refreshes.len(), 1);

        let follow_up = state.directory_refreshed(refreshes[0], Ok(vec![summary(BOB)]));
        let [Effect::RefreshDirectory(second)] = follow_up.as_slice() else {
            panic!("expected one follow-up, got {follow_up:?}");
        };
        assert!(state.directory_refreshed(*second, Ok(vec![summary(BOB)])).is_empty());

        // Idle again: the next event fetches straight away.
        let effects = state.handle_event(ChannelEvent::MessageDeleted { id: Uuid::new_v4() });
        assert!(matches!(effects.as_slice(), [Effect::RefreshDirectory(_)]));
    }

    #[test]
    fn select_fetches_participant_only_when_unknown() {
        let mut state = ChatState::new(ME);
        let effects = state.select_conversation(BOB);
        assert!(effects.iter().any(|e| matches!(e, Effect::FetchParticipant { id, .. } if *id == BOB)));

        let Some(Effect::RefreshDirectory(ticket)) = state.refresh() else {
            unreachable!()
        };
        assert!(state.directory_refreshed(ticket, Ok(vec![summary(CAROL)])).is_empty());
        let effects = state.select_conversation(CAROL);
        assert!(!effects.iter().any(|e| matches!(e, Effect::FetchParticipant { .. })));
        assert_eq!(state.open_participant().map(|p| p.id), Some(CAROL));
    }

    #[test]
    fn stale_transcript_never_lands_in_another_conversation() {
        let mut state = ChatState::new(ME);
        let (c_ticket, _) = transcript_fetch(&state.select_conversation(CAROL));
        let (b_ticket, _) = transcript_fetch(&state.select_conversation(BOB));

        state.transcript_loaded(c_ticket, CAROL, Ok(vec![message(CAROL, ME, "for carol")]));
        assert!(state.reconciler().transcript().is_empty());
        assert!(state.is_loading());

        state.transcript_loaded(b_ticket, BOB, Ok(vec![message(BOB, ME, "for bob")]));
        assert_eq!(contents(&state), vec!["for bob"]);
        assert!(!state.is_loading());
    }

    #[test]
    fn reselecting_the_same_conversation_discards_the_older_load() {
        let mut state = ChatState::new(ME);
        let (first, _) = transcript_fetch(&state.select_conversation(BOB));
        let (second, _) = transcript_fetch(&state.select_conversation(BOB));

        state.transcript_loaded(first, BOB, Ok(vec![message(BOB, ME, "old")]));
        assert!(state.is_loading());
        state.transcript_loaded(second, BOB, Ok(vec![message(BOB, ME, "new")]));
        assert_eq!(contents(&state), vec!["new"]);
    }

    #[test]
    fn events_during_load_are_replayed_after_it() {
        let mut state = ChatState::new(ME);
        let (ticket, _) = transcript_fetch(&state.select_conversation(BOB));

        let history = message(BOB, ME, "history");
        let live = message(BOB, ME, "live");
        let effects = state.handle_event(ChannelEvent::MessageCreated(live.clone()));
        assert!(matches!(effects.as_slice(), [Effect::RefreshDirectory(_)]));
        assert!(state.reconciler().transcript().is_empty());

        // The fetch raced the event and already includes it.
        state.transcript_loaded(ticket, BOB, Ok(vec![history, live]));
        assert_eq!(contents(&state), vec!["history", "live"]);
    }

    #[test]
    fn edit_buffered_during_load_applies_to_fetched_message() {
        let mut state = ChatState::new(ME);
        let (ticket, _) = transcript_fetch(&state.select_conversation(BOB));
        let original = message(BOB, ME, "draft");
        let mut edited = original.clone();
        edited.content = "final".into();
        edited.updated_at = Some(Utc::now());

        state.handle_event(ChannelEvent::MessageUpdated(edited));
        state.transcript_loaded(ticket, BOB, Ok(vec![original]));
        assert_eq!(contents(&state), vec!["final"]);
    }

    #[test]
    fn failed_load_keeps_pending_and_replays_buffer() {
        let mut state = ChatState::new(ME);
        let (ticket, _) = transcript_fetch(&state.select_conversation(BOB));
        state.send_message("typed early");
        state.handle_event(ChannelEvent::MessageCreated(message(BOB, ME, "live")));

        state.transcript_loaded(ticket, BOB, Err(FetchError::Status(503)));
        assert!(state.load_failed());
        assert_eq!(contents(&state), vec!["typed early", "live"]);
    }

    #[test]
    fn message_for_unopened_conversation_only_refreshes() {
        // Viewing Bob, Carol writes.
        let mut state = ChatState::new(ME);
        let (ticket, _) = transcript_fetch(&state.select_conversation(BOB));
        state.transcript_loaded(ticket, BOB, Ok(vec![]));

        let from_carol = message(CAROL, ME, "are you free?");
        let effects = state.handle_event(ChannelEvent::MessageCreated(from_carol.clone()));
        assert!(matches!(effects.as_slice(), [Effect::RefreshDirectory(_)]));
        assert!(state.reconciler().transcript().is_empty());

        // Opening Carol later shows it through the fetch.
        let (ticket, _) = transcript_fetch(&state.select_conversation(CAROL));
        state.transcript_loaded(ticket, CAROL, Ok(vec![from_carol]));
        assert_eq!(contents(&state), vec!["are you free?"]);
    }

    #[test]
    fn send_while_disconnected_stays_pending_and_resends_with_same_ref() {
        let mut state = ChatState::new(ME);
        let (ticket, _) = transcript_fetch(&state.select_conversation(BOB));
        state.transcript_loaded(ticket, BOB, Ok(vec![]));

        let effects = state.send_message("hello");
        let sent = emitted(&effects)[0].clone();
        assert!(effects.iter().any(|e| matches!(e, Effect::RefreshDirectory(_))));
        assert_eq!(state.reconciler().pending_count(), 1);

        let resent = state.resend_pending();
        assert_eq!(emitted(&resent), vec![&sent]);

        // Both copies reach the server; it echoes one stored message twice.
        let echo = echo_of(&sent);
        state.handle_event(ChannelEvent::MessageCreated(echo.clone()));
        state.handle_event(ChannelEvent::MessageCreated(echo));
        assert_eq!(contents(&state), vec!["hello"]);
        assert_eq!(state.reconciler().pending_count(), 0);
        assert!(state.resend_pending().is_empty());
    }

    #[test]
    fn blank_sends_and_sends_without_selection_are_ignored() {
        let mut state = ChatState::new(ME);
        assert!(state.send_message("hello").is_empty());
        state.select_conversation(BOB);
        assert!(state.send_message("   ").is_empty());
    }

    #[test]
    fn local_delete_emits_and_refreshes() {
        let mut state = ChatState::new(ME);
        let (ticket, _) = transcript_fetch(&state.select_conversation(BOB));
        let mine = message(ME, BOB, "oops");
        let id = mine.id;
        state.transcript_loaded(ticket, BOB, Ok(vec![mine]));

        let effects = state.delete_message(id);
        assert_eq!(emitted(&effects), vec![&ChannelCommand::Delete { id }]);
        assert!(state.reconciler().transcript().is_empty());
        assert!(state.delete_message(id).is_empty());
    }

    #[test]
    fn rejected_edit_emits_nothing() {
        let mut state = ChatState::new(ME);
        let (ticket, _) = transcript_fetch(&state.select_conversation(BOB));
        let theirs = message(BOB, ME, "theirs");
        let id = theirs.id;
        state.transcript_loaded(ticket, BOB, Ok(vec![theirs]));
        assert!(state.edit_message(id, "mine now").is_empty());
    }

    #[test]
    fn remote_conversation_deletion_clears_selection_and_late_load() {
        let mut state = ChatState::new(ME);
        let (ticket, _) = transcript_fetch(&state.select_conversation(BOB));

        state.handle_event(ChannelEvent::ConversationDeleted { other_user_id: BOB });
        assert_eq!(state.selected(), None);
        assert_eq!(state.directory().selected(), None);

        state.transcript_loaded(ticket, BOB, Ok(vec![message(BOB, ME, "late")]));
        assert!(state.reconciler().transcript().is_empty());
    }

    #[test]
    fn local_conversation_deletion_emits_command() {
        let mut state = ChatState::new(ME);
        state.select_conversation(BOB);
        let effects = state.delete_conversation(BOB);
        assert_eq!(
            emitted(&effects),
            vec![&ChannelCommand::DeleteConversation { other_user_id: BOB }]
        );
        assert_eq!(state.selected(), None);
    }

    #[test]
    fn stale_participant_is_discarded() {
        let mut state = ChatState::new(ME);
        let effects = state.select_conversation(BOB);
        let ticket = match effects.last() {
            Some(Effect::FetchParticipant { ticket, .. }) => *ticket,
            other => panic!("unexpected {other:?}"),
        };
        state.select_conversation(CAROL);
        state.participant_loaded(ticket, BOB, Ok(participant(BOB)));
        assert_eq!(state.open_participant(), None);
    }
}
