//! Execution of client commands: persist, then notify both parties.

use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info, warn};
use uuid::Uuid;

use jobchat_db::models::MessageRow;
use jobchat_db::{Database, now_timestamp};
use jobchat_types::events::{ChannelCommand, ChannelEvent};

use crate::dispatcher::Dispatcher;
use crate::{blocking, convert};

pub const MAX_CONTENT_LEN: usize = 4000;

/// Why a command was not carried out. Refusals are logged and dropped; the
/// client learns nothing because it never receives an echo.
type Refusal = &'static str;

pub async fn handle_command(
    db: &Arc<Database>,
    dispatcher: &Dispatcher,
    user_id: Uuid,
    command: ChannelCommand,
) -> Result<()> {
    match command {
        ChannelCommand::Send {
            receiver_id,
            content,
            client_ref,
        } => send(db, dispatcher, user_id, receiver_id, content, client_ref).await,
        ChannelCommand::Update { id, content } => update(db, dispatcher, user_id, id, content).await,
        ChannelCommand::Delete { id } => delete(db, dispatcher, user_id, id).await,
        ChannelCommand::DeleteConversation { other_user_id } => {
            delete_conversation(db, dispatcher, user_id, other_user_id).await
        }
    }
}

fn check_content(content: &str) -> std::result::Result<(), Refusal> {
    if content.trim().is_empty() {
        return Err("empty content");
    }
    if content.len() > MAX_CONTENT_LEN {
        return Err("content too long");
    }
    Ok(())
}

async fn send(
    db: &Arc<Database>,
    dispatcher: &Dispatcher,
    user_id: Uuid,
    receiver_id: Uuid,
    content: String,
    client_ref: Option<String>,
) -> Result<()> {
    if let Err(reason) = check_content(&content) {
        warn!("{} send refused: {}", user_id, reason);
        return Ok(());
    }
    if receiver_id == user_id {
        warn!("{} send refused: cannot message yourself", user_id);
        return Ok(());
    }

    let sender = user_id.to_string();
    let receiver = receiver_id.to_string();
    let stored = blocking(db, move |db| {
        if db.get_user_by_id(&receiver)?.is_none() {
            return Ok(Err("unknown receiver"));
        }
        // A resend of something already stored is answered with the stored copy.
        if let Some(existing) = client_ref
            .as_deref()
            .map(|r| db.find_by_client_ref(&sender, r))
            .transpose()?
            .flatten()
        {
            return Ok(Ok((existing, false)));
        }
        let row = MessageRow {
            id: Uuid::new_v4().to_string(),
            sender_id: sender,
            receiver_id: receiver,
            content,
            client_ref,
            created_at: now_timestamp(),
            updated_at: None,
            read: false,
        };
        db.insert_message(&row)?;
        Ok(Ok((row, true)))
    })
    .await?;

    let (row, fresh) = match stored {
        Ok(stored) => stored,
        Err(reason) => {
            warn!("{} send refused: {}", user_id, reason);
            return Ok(());
        }
    };
    let message = convert::chat_message(row)?;

    if fresh {
        debug!("{} -> {}: message {}", user_id, receiver_id, message.id);
        let mut delivered = message.clone();
        delivered.client_ref = None;
        dispatcher
            .send_to_user(receiver_id, ChannelEvent::MessageCreated(delivered))
            .await;
    } else {
        debug!("{} resent {}, echoing stored copy", user_id, message.id);
    }
    dispatcher
        .send_to_user(user_id, ChannelEvent::MessageCreated(message))
        .await;
    Ok(())
}

async fn update(
    db: &Arc<Database>,
    dispatcher: &Dispatcher,
    user_id: Uuid,
    id: Uuid,
    content: String,
) -> Result<()> {
    if let Err(reason) = check_content(&content) {
        warn!("{} edit of {} refused: {}", user_id, id, reason);
        return Ok(());
    }

    let owner = user_id.to_string();
    let updated = blocking(db, move |db| {
        let id = id.to_string();
        match db.get_message(&id)? {
            None => return Ok(Err("unknown message")),
            Some(existing) if existing.sender_id != owner => return Ok(Err("not the sender")),
            Some(_) => {}
        }
        Ok(db
            .update_message_content(&id, &content, &now_timestamp())?
            .ok_or("unknown message"))
    })
    .await?;

    let row = match updated {
        Ok(row) => row,
        Err(reason) => {
            warn!("{} edit of {} refused: {}", user_id, id, reason);
            return Ok(());
        }
    };
    let mut message = convert::chat_message(row)?;
    // Only the creation echo correlates.
    message.client_ref = None;
    fan_out(dispatcher, message.sender_id, message.receiver_id, ChannelEvent::MessageUpdated(message)).await;
    Ok(())
}

async fn delete(db: &Arc<Database>, dispatcher: &Dispatcher, user_id: Uuid, id: Uuid) -> Result<()> {
    let owner = user_id.to_string();
    let removed = blocking(db, move |db| {
        let id = id.to_string();
        let Some(existing) = db.get_message(&id)? else {
            return Ok(Err("unknown message"));
        };
        if existing.sender_id != owner {
            return Ok(Err("not the sender"));
        }
        db.delete_message(&id)?;
        Ok(Ok(existing))
    })
    .await?;

    let row = match removed {
        Ok(row) => row,
        Err(reason) => {
            debug!("{} delete of {} ignored: {}", user_id, id, reason);
            return Ok(());
        }
    };
    let message = convert::chat_message(row)?;
    fan_out(dispatcher, message.sender_id, message.receiver_id, ChannelEvent::MessageDeleted { id }).await;
    Ok(())
}

async fn delete_conversation(
    db: &Arc<Database>,
    dispatcher: &Dispatcher,
    user_id: Uuid,
    other_user_id: Uuid,
) -> Result<()> {
    let (me, other) = (user_id.to_string(), other_user_id.to_string());
    let removed = blocking(db, move |db| db.delete_conversation(&me, &other)).await?;
    info!("{} deleted conversation with {} ({} messages)", user_id, other_user_id, removed);

    dispatcher
        .send_to_user(user_id, ChannelEvent::ConversationDeleted { other_user_id })
        .await;
    dispatcher
        .send_to_user(
            other_user_id,
            ChannelEvent::ConversationDeleted {
                other_user_id: user_id,
            },
        )
        .await;
    Ok(())
}

async fn fan_out(dispatcher: &Dispatcher, a: Uuid, b: Uuid, event: ChannelEvent) {
    dispatcher.send_to_user(a, event.clone()).await;
    dispatcher.send_to_user(b, event).await;
}
