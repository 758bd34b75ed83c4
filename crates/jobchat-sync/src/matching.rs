//! Pairing of server echoes with optimistic local entries.

use jobchat_types::models::ChatMessage;

use crate::message::{Message, PendingMessage};

/// Finds the index of the pending entry that `echo` confirms.
///
/// An explicit `client_ref` on the echo is authoritative: when present only
/// the pending entry with that local id can match, and a miss means the
/// entry was already confirmed. Without one, the oldest pending entry with
/// the same sender, receiver and content wins, so rapid identical sends are
/// paired in send order.
pub fn find_pending_for_echo(transcript: &[Message], echo: &ChatMessage) -> Option<usize> {
    if let Some(client_ref) = echo.client_ref.as_deref() {
        return find_by_ref(transcript, client_ref);
    }

    transcript.iter().position(|entry| match entry {
        Message::Pending(p) => looks_like_echo(p, echo),
        Message::Confirmed(_) => false,
    })
}

/// Same pairing rules over entries parked for a conversation that is not open.
pub fn find_parked_for_echo(parked: &[PendingMessage], echo: &ChatMessage) -> Option<usize> {
    match echo.client_ref.as_deref() {
        Some(client_ref) => parked.iter().position(|p| p.local_id.matches_ref(client_ref)),
        None => parked.iter().position(|p| looks_like_echo(p, echo)),
    }
}

/// Heuristic pairing used when the echo carries no correlation id.
pub fn looks_like_echo(pending: &PendingMessage, echo: &ChatMessage) -> bool {
    pending.sender_id == echo.sender_id
        && pending.receiver_id == echo.receiver_id
        && pending.content == echo.content
}

/// Index of the pending entry whose local id renders as `client_ref`.
pub fn find_by_ref(transcript: &[Message], client_ref: &str) -> Option<usize> {
    transcript.iter().position(|entry| match entry {
        Message::Pending(p) => p.local_id.matches_ref(client_ref),
        Message::Confirmed(_) => false,
    })
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::*;
    use crate::message::{LocalIdGenerator, PendingMessage};

    const ME: Uuid = Uuid::from_u128(1);
    const THEM: Uuid = Uuid::from_u128(2);

    fn pending(ids: &mut LocalIdGenerator, content: &str) -> Message {
        Message::Pending(PendingMessage {
            local_id: ids.next_id(),
            sender_id: ME,
            receiver_id: THEM,
            content: content.into(),
            created_at: Utc::now(),
        })
    }

    fn echo(content: &str, client_ref: Option<String>) -> ChatMessage {
        ChatMessage {
            id: Uuid::new_v4(),
            sender_id: ME,
            receiver_id: THEM,
            content: content.into(),
            created_at: Utc::now(),
            updated_at: None,
            read: false,
            client_ref,
        }
    }

    #[test]
    fn heuristic_picks_oldest_identical_pending() {
        let mut ids = LocalIdGenerator::new();
        let transcript = vec![
            pending(&mut ids, "hello"),
            pending(&mut ids, "ok"),
            pending(&mut ids, "ok"),
        ];
        assert_eq!(find_pending_for_echo(&transcript, &echo("ok", None)), Some(1));
    }

    #[test]
    fn heuristic_skips_confirmed_entries() {
        let mut ids = LocalIdGenerator::new();
        let transcript = vec![
            Message::Confirmed(echo("ok", None)),
            pending(&mut ids, "ok"),
        ];
        assert_eq!(find_pending_for_echo(&transcript, &echo("ok", None)), Some(1));
    }

    #[test]
    fn heuristic_requires_same_receiver() {
        let mut ids = LocalIdGenerator::new();
        let transcript = vec![pending(&mut ids, "ok")];
        let mut other = echo("ok", None);
        other.receiver_id = Uuid::from_u128(3);
        assert_eq!(find_pending_for_echo(&transcript, &other), None);
    }

    #[test]
    fn correlation_id_beats_send_order() {
        let mut ids = LocalIdGenerator::new();
        let transcript = vec![pending(&mut ids, "ok"), pending(&mut ids, "ok")];
        let second = transcript[1].local_id().unwrap().to_string();
        assert_eq!(
            find_pending_for_echo(&transcript, &echo("ok", Some(second))),
            Some(1)
        );
    }

    #[test]
    fn parked_entries_follow_the_same_rules() {
        let mut ids = LocalIdGenerator::new();
        let parked: Vec<PendingMessage> = [pending(&mut ids, "a"), pending(&mut ids, "b")]
            .into_iter()
            .map(|m| match m {
                Message::Pending(p) => p,
                Message::Confirmed(_) => unreachable!(),
            })
            .collect();
        assert_eq!(find_parked_for_echo(&parked, &echo("b", None)), Some(1));
        let first = parked[0].local_id.to_string();
        assert_eq!(find_parked_for_echo(&parked, &echo("b", Some(first))), Some(0));
        assert_eq!(find_parked_for_echo(&parked, &echo("c", None)), None);
    }

    #[test]
    fn unknown_correlation_id_does_not_fall_back() {
        let mut ids = LocalIdGenerator::new();
        let transcript = vec![pending(&mut ids, "ok")];
        let foreign = LocalIdGenerator::new().next_id().to_string();
        assert_eq!(
            find_pending_for_echo(&transcript, &echo("ok", Some(foreign))),
            None
        );
    }
}
