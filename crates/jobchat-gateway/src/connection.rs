use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tracing::{error, info, trace, warn};
use uuid::Uuid;

use jobchat_db::Database;
use jobchat_types::events::{ChannelCommand, ChannelEvent};

use crate::commands::handle_command;
use crate::dispatcher::Dispatcher;

const PING_EVERY: Duration = Duration::from_secs(15);
const MAX_MISSED_PONGS: u8 = 2;

/// Missed-pong bookkeeping for one connection.
#[derive(Debug, Default)]
struct Heartbeat {
    missed: u8,
}

impl Heartbeat {
    /// Called on every ping tick with whether a pong arrived since the last
    /// one. Returns false once the peer should be dropped.
    fn tick(&mut self, pong_seen: bool) -> bool {
        if pong_seen {
            self.missed = 0;
        } else {
            self.missed += 1;
        }
        self.missed < MAX_MISSED_PONGS
    }
}

fn encode(event: &ChannelEvent) -> Option<Message> {
    match serde_json::to_string(event) {
        Ok(text) => Some(Message::Text(text.into())),
        Err(e) => {
            error!("could not encode {:?}: {}", event.kind(), e);
            None
        }
    }
}

/// Serve one gateway connection for `user_id`, whose token the upgrade
/// handler already checked.
pub async fn handle_connection(
    socket: WebSocket,
    db: Arc<Database>,
    dispatcher: Dispatcher,
    user_id: Uuid,
) {
    let (mut sink, mut stream) = socket.split();

    let (conn_id, mut events) = dispatcher.register_user_channel(user_id).await;
    info!(
        "{} joined the gateway ({} connections)",
        user_id,
        dispatcher.connection_count(user_id).await
    );

    let pong_seen = Arc::new(AtomicBool::new(true));

    // Targeted events out, pings on a timer.
    let writer_pong = pong_seen.clone();
    let mut writer = tokio::spawn(async move {
        let mut ping = tokio::time::interval(PING_EVERY);
        ping.tick().await;
        let mut heartbeat = Heartbeat::default();

        loop {
            let frame = tokio::select! {
                event = events.recv() => match event {
                    Some(event) => match encode(&event) {
                        Some(frame) => frame,
                        None => continue,
                    },
                    None => break,
                },
                _ = ping.tick() => {
                    if !heartbeat.tick(writer_pong.swap(false, Ordering::AcqRel)) {
                        warn!("{} missed {} pongs, dropping", user_id, heartbeat.missed);
                        break;
                    }
                    Message::Ping(Default::default())
                }
            };
            if sink.send(frame).await.is_err() {
                break;
            }
        }
    });

    // Commands from one connection are executed in arrival order.
    let command_dispatcher = dispatcher.clone();
    let mut reader = tokio::spawn(async move {
        while let Some(Ok(frame)) = stream.next().await {
            match frame {
                Message::Text(text) => match serde_json::from_str::<ChannelCommand>(&text) {
                    Ok(command) => {
                        trace!("{} command: {:?}", user_id, command);
                        if let Err(e) =
                            handle_command(&db, &command_dispatcher, user_id, command).await
                        {
                            error!("{} command failed: {:#}", user_id, e);
                        }
                    }
                    Err(e) => {
                        let head: String = text.chars().take(200).collect();
                        warn!("{} sent an unreadable command ({}): {}", user_id, e, head);
                    }
                },
                Message::Pong(_) => pong_seen.store(true, Ordering::Release),
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    dispatcher.unregister_user_channel(user_id, conn_id).await;
    info!("{} left the gateway", user_id);
}
