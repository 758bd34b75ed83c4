//! Authoritative read endpoints used by clients to (re)build their state.

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use tracing::{debug, error};
use uuid::Uuid;

use jobchat_gateway::{blocking, convert};
use jobchat_types::api::Claims;
use jobchat_types::events::ChannelEvent;
use jobchat_types::models::{ChatMessage, ConversationSummary, Participant};

use crate::auth::AppState;

fn internal(e: anyhow::Error) -> StatusCode {
    error!("{:#}", e);
    StatusCode::INTERNAL_SERVER_ERROR
}

/// One entry per counterpart, most recent activity first.
pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<ConversationSummary>>, StatusCode> {
    let me = claims.sub.to_string();
    let rows = blocking(&state.db, move |db| db.list_conversations(&me))
        .await
        .map_err(internal)?;

    let list = rows
        .into_iter()
        .map(convert::conversation)
        .collect::<anyhow::Result<Vec<_>>>()
        .map_err(internal)?;
    Ok(Json(list))
}

/// Full transcript with `other_id`, oldest first. Fetching it marks the
/// counterpart's messages as read; both parties are told through
/// `MessageUpdated`.
pub async fn get_transcript(
    State(state): State<AppState>,
    Path(other_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<ChatMessage>>, StatusCode> {
    let (me, other) = (claims.sub.to_string(), other_id.to_string());
    let (rows, newly_read) = blocking(&state.db, move |db| {
        let newly_read = db.mark_read(&me, &other)?;
        let rows = db.get_transcript(&me, &other)?;
        Ok((rows, newly_read))
    })
    .await
    .map_err(internal)?;

    if !newly_read.is_empty() {
        debug!("{} read {} messages from {}", claims.sub, newly_read.len(), other_id);
    }
    for row in newly_read {
        let mut message = convert::chat_message(row).map_err(internal)?;
        // Only the creation echo correlates.
        message.client_ref = None;
        state
            .dispatcher
            .send_to_user(other_id, ChannelEvent::MessageUpdated(message.clone()))
            .await;
        state
            .dispatcher
            .send_to_user(claims.sub, ChannelEvent::MessageUpdated(message))
            .await;
    }

    let messages = rows
        .into_iter()
        .map(|row| -> anyhow::Result<ChatMessage> {
            let mut message = convert::chat_message(row)?;
            // Correlation ids are only ever shown to their sender.
            if message.sender_id != claims.sub {
                message.client_ref = None;
            }
            Ok(message)
        })
        .collect::<anyhow::Result<Vec<_>>>()
        .map_err(internal)?;
    Ok(Json(messages))
}

pub async fn get_participant(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Extension(_claims): Extension<Claims>,
) -> Result<Json<Participant>, StatusCode> {
    let user = blocking(&state.db, move |db| db.get_user_by_id(&id.to_string()))
        .await
        .map_err(internal)?
        .ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(convert::participant(user).map_err(internal)?))
}
