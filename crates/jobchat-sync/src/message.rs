use std::fmt;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use jobchat_types::models::ChatMessage;

/// Prefix of every locally generated id. Server ids are UUIDs and never
/// start with it.
pub const LOCAL_ID_PREFIX: &str = "local-";

/// Temporary identifier of a message that has not been confirmed yet.
///
/// The nonce is random per generator so ids from two client sessions of the
/// same user never collide when echoed back through the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocalId {
    nonce: Uuid,
    seq: u64,
}

impl LocalId {
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// True when `client_ref` is the wire form of this id.
    pub fn matches_ref(&self, client_ref: &str) -> bool {
        client_ref == self.to_string()
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}-{}", LOCAL_ID_PREFIX, self.nonce.simple(), self.seq)
    }
}

/// Monotonic source of [`LocalId`]s.
#[derive(Debug)]
pub struct LocalIdGenerator {
    nonce: Uuid,
    next: u64,
}

impl LocalIdGenerator {
    pub fn new() -> Self {
        Self {
            nonce: Uuid::new_v4(),
            next: 1,
        }
    }

    pub fn next_id(&mut self) -> LocalId {
        let id = LocalId {
            nonce: self.nonce,
            seq: self.next,
        };
        self.next += 1;
        id
    }
}

impl Default for LocalIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// A message the local user sent that the server has not echoed yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMessage {
    pub local_id: LocalId,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub content: String,
    /// Provisional, client clock.
    pub created_at: DateTime<Utc>,
}

/// Stable key of a transcript entry, usable as a render key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKey {
    Local(LocalId),
    Server(Uuid),
}

impl fmt::Display for MessageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(id) => id.fmt(f),
            Self::Server(id) => id.fmt(f),
        }
    }
}

/// One transcript entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Pending(PendingMessage),
    Confirmed(ChatMessage),
}

impl Message {
    pub fn key(&self) -> MessageKey {
        match self {
            Self::Pending(p) => MessageKey::Local(p.local_id),
            Self::Confirmed(m) => MessageKey::Server(m.id),
        }
    }

    pub fn server_id(&self) -> Option<Uuid> {
        match self {
            Self::Pending(_) => None,
            Self::Confirmed(m) => Some(m.id),
        }
    }

    pub fn local_id(&self) -> Option<LocalId> {
        match self {
            Self::Pending(p) => Some(p.local_id),
            Self::Confirmed(_) => None,
        }
    }

    pub fn sender_id(&self) -> Uuid {
        match self {
            Self::Pending(p) => p.sender_id,
            Self::Confirmed(m) => m.sender_id,
        }
    }

    pub fn receiver_id(&self) -> Uuid {
        match self {
            Self::Pending(p) => p.receiver_id,
            Self::Confirmed(m) => m.receiver_id,
        }
    }

    pub fn content(&self) -> &str {
        match self {
            Self::Pending(p) => &p.content,
            Self::Confirmed(m) => &m.content,
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            Self::Pending(p) => p.created_at,
            Self::Confirmed(m) => m.created_at,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }

    pub fn is_edited(&self) -> bool {
        match self {
            Self::Pending(_) => false,
            Self::Confirmed(m) => m.is_edited(),
        }
    }

    pub fn is_read(&self) -> bool {
        match self {
            Self::Pending(_) => false,
            Self::Confirmed(m) => m.read,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_ids_are_monotonic_and_prefixed() {
        let mut ids = LocalIdGenerator::new();
        let a = ids.next_id();
        let b = ids.next_id();
        assert!(a < b);
        assert_eq!(b.seq(), a.seq() + 1);
        assert!(a.to_string().starts_with(LOCAL_ID_PREFIX));
        assert!(a.matches_ref(&a.to_string()));
        assert!(!a.matches_ref(&b.to_string()));
    }

    #[test]
    fn generators_do_not_share_refs() {
        let a = LocalIdGenerator::new().next_id();
        let b = LocalIdGenerator::new().next_id();
        assert_eq!(a.seq(), b.seq());
        assert!(!a.matches_ref(&b.to_string()));
    }

    #[test]
    fn local_id_never_parses_as_server_id() {
        let id = LocalIdGenerator::new().next_id();
        assert!(Uuid::parse_str(&id.to_string()).is_err());
    }
}
