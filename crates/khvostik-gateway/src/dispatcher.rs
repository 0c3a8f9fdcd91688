use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast, mpsc};
use tracing::error;
use uuid::Uuid;

use khvostik_types::events::RealtimeEvent;

/// A chat-scoped event, serialized once and shared by every connection.
#[derive(Debug, Clone)]
pub struct BroadcastMessage {
    pub chat_id: Option<Uuid>,
    pub json: Arc<str>,
}

/// Manages connected clients and fans events out to them.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Every connection receives every broadcast and drops chats it does not follow
    broadcast_tx: broadcast::Sender<BroadcastMessage>,

    /// Per-user targeted send channels: user_id -> (conn_id -> sender).
    /// A user may hold several connections (tabs, devices).
    user_channels: RwLock<HashMap<Uuid, HashMap<Uuid, mpsc::UnboundedSender<RealtimeEvent>>>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner {
                broadcast_tx,
                user_channels: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Subscribe to broadcast events.
    pub fn subscribe(&self) -> broadcast::Receiver<BroadcastMessage> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Broadcast an event to all connections; those not following its chat
    /// discard it.
    pub fn broadcast(&self, event: RealtimeEvent) {
        let json = match serde_json::to_string(&event) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize realtime event: {}", e);
                return;
            }
        };

        // No receivers is not an error: nobody is online.
        let _ = self.inner.broadcast_tx.send(BroadcastMessage {
            chat_id: event.chat_id(),
            json: json.into(),
        });
    }

    /// Register a targeted channel for one connection. Returns (conn_id, receiver).
    pub async fn register_user_channel(&self, user_id: Uuid) -> (Uuid, mpsc::UnboundedReceiver<RealtimeEvent>) {
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

    /// Unregister one connection's targeted channel.
    pub async fn unregister_user_channel(&self, user_id: Uuid, conn_id: Uuid) {
        let mut channels = self.inner.user_channels.write().await;
        if let Some(conns) = channels.get_mut(&user_id) {
            conns.remove(&conn_id);
            if conns.is_empty() {
                channels.remove(&user_id);
            }
        }
    }

    /// Send a targeted event to every connection of a user. Returns how many
    /// connections it reached.
    pub async fn send_to_user(&self, user_id: Uuid, event: RealtimeEvent) -> usize {
        let channels = self.inner.user_channels.read().await;
        let Some(conns) = channels.get(&user_id) else {
            return 0;
        };

        conns
            .values()
            .filter(|tx| tx.send(event.clone()).is_ok())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use khvostik_types::models::Message;

    #[tokio::test]
    async fn broadcast_carries_chat_scope() {
        let dispatcher = Dispatcher::new();
        let mut rx = dispatcher.subscribe();
        let chat_id = Uuid::new_v4();

        dispatcher.broadcast(RealtimeEvent::MessageCreate {
            message: Message {
                id: Uuid::new_v4(),
                chat_id,
                sender_id: Uuid::new_v4(),
                body: "Нашёлся!".into(),
                created_at: chrono::Utc::now(),
            },
        });

        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.chat_id, Some(chat_id));
        assert!(msg.json.contains("MessageCreate"));
    }

    #[tokio::test]
    async fn targeted_events_reach_every_connection_of_the_user() {
        let dispatcher = Dispatcher::new();
        let user = Uuid::new_v4();
        let (_, mut first) = dispatcher.register_user_channel(user).await;
        let (second_id, mut second) = dispatcher.register_user_channel(user).await;

        let chat_id = Uuid::new_v4();
        let reached = dispatcher
            .send_to_user(user, RealtimeEvent::ChatArchived { chat_id })
            .await;
        assert_eq!(reached, 2);
        assert!(matches!(first.recv().await, Some(RealtimeEvent::ChatArchived { .. })));
        assert!(matches!(second.recv().await, Some(RealtimeEvent::ChatArchived { .. })));

        dispatcher.unregister_user_channel(user, second_id).await;
        let reached = dispatcher
            .send_to_user(user, RealtimeEvent::ChatRestored { chat_id })
            .await;
        assert_eq!(reached, 1);
    }

    #[tokio::test]
    async fn offline_user_gets_nothing() {
        let dispatcher = Dispatcher::new();
        let user = Uuid::new_v4();
        let (conn_id, _rx) = dispatcher.register_user_channel(user).await;
        dispatcher.unregister_user_channel(user, conn_id).await;

        let reached = dispatcher
            .send_to_user(user, RealtimeEvent::Ready { user_id: user })
            .await;
        assert_eq!(reached, 0);
    }
}
