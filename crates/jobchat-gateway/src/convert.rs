//! Row <-> wire model conversion.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use jobchat_db::models::{ConversationRow, MessageRow, UserRow};
use jobchat_types::models::{ChatMessage, ConversationSummary, Participant};

pub fn chat_message(row: MessageRow) -> Result<ChatMessage> {
    Ok(ChatMessage {
        id: parse_id(&row.id)?,
        sender_id: parse_id(&row.sender_id)?,
        receiver_id: parse_id(&row.receiver_id)?,
        content: row.content,
        created_at: parse_time(&row.created_at)?,
        updated_at: row.updated_at.as_deref().map(parse_time).transpose()?,
        read: row.read,
        client_ref: row.client_ref,
    })
}

pub fn participant(row: UserRow) -> Result<Participant> {
    Ok(Participant {
        id: parse_id(&row.id)?,
        first_name: row.first_name,
        last_name: row.last_name,
        avatar_url: row.avatar_url,
    })
}

pub fn conversation(row: ConversationRow) -> Result<ConversationSummary> {
    Ok(ConversationSummary {
        participant: Participant {
            id: parse_id(&row.other_user_id)?,
            first_name: row.first_name,
            last_name: row.last_name,
            avatar_url: row.avatar_url,
        },
        last_message: chat_message(row.last_message)?.preview(),
    })
}

fn parse_id(raw: &str) -> Result<Uuid> {
    raw.parse().with_context(|| format!("bad id in database: {raw}"))
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("bad timestamp in database: {raw}"))?
        .with_timezone(&Utc))
}
