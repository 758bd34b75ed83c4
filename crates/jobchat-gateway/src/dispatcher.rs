use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use jobchat_types::events::ChannelEvent;

/// Routes events to every open gateway connection of a user.
#[derive(Clone, Default)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

#[derive(Default)]
struct DispatcherInner {
    /// user_id -> (conn_id -> sender). A user may be connected from several
    /// devices at once.
    user_channels: RwLock<HashMap<Uuid, HashMap<Uuid, mpsc::UnboundedSender<ChannelEvent>>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection for `user_id`. Returns (conn_id, receiver).
    pub async fn register_user_channel(
        &self,
        user_id: Uuid,
    ) -> (Uuid, mpsc::UnboundedReceiver<ChannelEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .user_channels
            .write()
            .await
            .entry(user_id)
            .or_default()
            .insert(conn_id, tx);
        (conn_id, rx)
    }

    pub async fn unregister_user_channel(&self, user_id: Uuid, conn_id: Uuid) {
        let mut channels = self.inner.user_channels.write().await;
        if let Some(conns) = channels.get_mut(&user_id) {
            conns.remove(&conn_id);
            if conns.is_empty() {
                channels.remove(&user_id);
            }
        }
    }

    /// Send an event to every connection of `user_id`. Offline users simply
    /// miss it; they catch up through the REST endpoints.
    pub async fn send_to_user(&self, user_id: Uuid, event: ChannelEvent) {
        let channels = self.inner.user_channels.read().await;
        if let Some(conns) = channels.get(&user_id) {
            for tx in conns.values() {
                let _ = tx.send(event.clone());
            }
        }
    }

    pub async fn connection_count(&self, user_id: Uuid) -> usize {
        self.inner
            .user_channels
            .read()
            .await
            .get(&user_id)
            .map_or(0, HashMap::len)
    }
}
