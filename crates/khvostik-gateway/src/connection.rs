use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, Stream, StreamExt};
use jsonwebtoken::{DecodingKey, Validation, decode};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use khvostik_db::Database;
use khvostik_types::api::Claims;
use khvostik_types::events::{RealtimeCommand, RealtimeEvent};

use crate::dispatcher::{BroadcastMessage, Dispatcher};

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// How long a fresh socket may stay silent before sending Identify.
const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(10);

type Subscriptions = Arc<RwLock<HashSet<Uuid>>>;

/// Handle a single realtime WebSocket connection.
///
/// The client must send `Identify` with its JWT first; after `Ready` it
/// chooses which chats to follow with `Subscribe`.
pub async fn handle_connection(socket: WebSocket, dispatcher: Dispatcher, db: Arc<Database>, jwt_secret: String) {
    let (mut sender, mut receiver) = socket.split();

    let user_id = match wait_for_identify(&mut receiver, &jwt_secret, IDENTIFY_TIMEOUT).await {
        Some(id) => id,
        None => {
            warn!("WebSocket client failed to identify, closing");
            return;
        }
    };

    info!("User {} connected to realtime gateway", user_id);

    if send_event(&mut sender, &RealtimeEvent::Ready { user_id }).await.is_err() {
        return;
    }

    run_connection_loop(sender, receiver, dispatcher, db, user_id).await;
}

async fn run_connection_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    dispatcher: Dispatcher,
    db: Arc<Database>,
    user_id: Uuid,
) {
    let (conn_id, mut user_rx) = dispatcher.register_user_channel(user_id).await;
    let mut broadcast_rx = dispatcher.subscribe();

    // Replies meant for this connection only (e.g. Subscribed).
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<RealtimeEvent>();

    // Per-connection chat subscriptions (shared between send and recv tasks).
    let subscribed_chats: Subscriptions = Arc::new(RwLock::new(HashSet::new()));
    let send_subscriptions = subscribed_chats.clone();

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward broadcasts + targeted events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = broadcast_rx.recv() => {
                    let msg = match result {
                        Ok(msg) => msg,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Broadcast receiver lagged by {} messages", n);
                            continue;
                        }
                        Err(_) => break,
                    };

                    if !is_followed(&msg, &send_subscriptions) {
                        continue;
                    }

                    if sender.send(Message::Text(msg.json.to_string().into())).await.is_err() {
                        break;
                    }
                }
                Some(event) = user_rx.recv() => {
                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
                Some(event) = reply_rx.recv() => {
                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client
    let recv_subscriptions = subscribed_chats.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<RealtimeCommand>(&text) {
                    Ok(cmd) => {
                        handle_command(&db, user_id, cmd, &recv_subscriptions, &reply_tx).await;
                    }
                    Err(e) => {
                        let raw: String = text.chars().take(200).collect();
                        warn!("User {} sent bad command: {} -- raw: {}", user_id, e, raw);
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    dispatcher.unregister_user_channel(user_id, conn_id).await;
    info!("User {} disconnected from realtime gateway", user_id);
}

async fn send_event(sender: &mut SplitSink<WebSocket, Message>, event: &RealtimeEvent) -> Result<(), ()> {
    let text = serde_json::to_string(event).map_err(|e| {
        error!("Failed to serialize realtime event: {}", e);
    })?;
    sender.send(Message::Text(text.into())).await.map_err(|_| ())
}

/// Chat-scoped broadcasts only reach connections following that chat.
fn is_followed(msg: &BroadcastMessage, subscriptions: &Subscriptions) -> bool {
    match msg.chat_id {
        None => true,
        Some(chat_id) => subscriptions
            .read()
            .map(|subs| subs.contains(&chat_id))
            .unwrap_or(false),
    }
}

async fn wait_for_identify<S>(receiver: &mut S, jwt_secret: &str, within: Duration) -> Option<Uuid>
where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let identify = async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                if let Ok(RealtimeCommand::Identify { token }) = serde_json::from_str::<RealtimeCommand>(&text) {
                    return decode_user_id(&token, jwt_secret);
                }
            }
        }
        None
    };

    tokio::time::timeout(within, identify).await.ok().flatten()
}

fn decode_user_id(token: &str, jwt_secret: &str) -> Option<Uuid> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims.sub)
    .map_err(|e| debug!("Rejected realtime token: {}", e))
    .ok()
}

async fn handle_command(
    db: &Arc<Database>,
    user_id: Uuid,
    cmd: RealtimeCommand,
    subscriptions: &Subscriptions,
    reply_tx: &mpsc::UnboundedSender<RealtimeEvent>,
) {
    match cmd {
        RealtimeCommand::Identify { .. } => {} // Already handled

        RealtimeCommand::Subscribe { chat_ids } => {
            let allowed = match allowed_chats(db.clone(), user_id, chat_ids).await {
                Ok(allowed) => allowed,
                Err(e) => {
                    error!("Failed to check chat subscriptions for {}: {:#}", user_id, e);
                    return;
                }
            };

            info!("User {} follows {} chats", user_id, allowed.len());
            if let Ok(mut subs) = subscriptions.write() {
                *subs = allowed.iter().copied().collect();
            }
            let _ = reply_tx.send(RealtimeEvent::Subscribed { chat_ids: allowed });
        }
    }
}

/// Chats the user may follow: the ones they take part in, or any chat for admins.
async fn allowed_chats(db: Arc<Database>, user_id: Uuid, requested: Vec<Uuid>) -> anyhow::Result<Vec<Uuid>> {
    tokio::task::spawn_blocking(move || -> anyhow::Result<Vec<Uuid>> {
        let uid = user_id.to_string();
        let is_admin = db
            .get_user_by_id(&uid)?
            .is_some_and(|user| user.role().is_admin());
        if is_admin {
            return Ok(requested);
        }

        let ids: Vec<String> = requested.iter().map(Uuid::to_string).collect();
        let allowed = db.filter_participating_chats(&uid, &ids)?;
        Ok(requested
            .into_iter()
            .filter(|id| allowed.contains(&id.to_string()))
            .collect())
    })
    .await?
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header, encode};
    use futures_util::stream;
    use khvostik_db::models::{PetRow, UserRow, now_timestamp};
    use khvostik_types::models::Role;

    fn token(secret: &str, sub: Uuid) -> String {
        let claims = Claims {
            sub,
            email: "a@example.com".into(),
            role: Role::User,
            exp: (chrono::Utc::now() + chrono::Duration::hours(1)).timestamp() as usize,
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
    }

    fn user(db: &Database, role: &str) -> Uuid {
        let id = Uuid::new_v4();
        db.create_user(&UserRow {
            id: id.to_string(),
            email: format!("{id}@example.com"),
            name: "Тест".into(),
            password: "hash".into(),
            role: role.into(),
            created_at: now_timestamp(),
        })
        .unwrap();
        id
    }

    #[test]
    fn token_must_match_secret() {
        let user_id = Uuid::new_v4();
        assert_eq!(decode_user_id(&token("s3cret", user_id), "s3cret"), Some(user_id));
        assert_eq!(decode_user_id(&token("s3cret", user_id), "other"), None);
        assert_eq!(decode_user_id("garbage", "s3cret"), None);
    }

    #[tokio::test]
    async fn strangers_cannot_follow_foreign_chats() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let stranger = user(&db, "user");
        let requested = vec![Uuid::new_v4()];

        let allowed = allowed_chats(db.clone(), stranger, requested).await.unwrap();
        assert!(allowed.is_empty());
    }

    #[tokio::test]
    async fn admins_follow_anything() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let admin = user(&db, "admin");
        let requested = vec![Uuid::new_v4(), Uuid::new_v4()];

        let allowed = allowed_chats(db.clone(), admin, requested.clone()).await.unwrap();
        assert_eq!(allowed, requested);
    }

    fn chat_between(db: &Database, owner: Uuid, requester: Uuid) -> Uuid {
        let pet_id = Uuid::new_v4().to_string();
        db.insert_pet(&PetRow {
            id: pet_id.clone(),
            kind: "found".into(),
            species: "собака".into(),
            breed: None,
            name: None,
            description: None,
            color: None,
            location: "Анапа".into(),
            latitude: None,
            longitude: None,
            contact_name: "Анна".into(),
            contact_phone: "+7 900 000-00-00".into(),
            reward: None,
            photo_url: None,
            status: "active".into(),
            user_id: owner.to_string(),
            created_at: now_timestamp(),
            updated_at: now_timestamp(),
        })
        .unwrap();
        let chat_id = Uuid::new_v4();
        db.get_or_create_chat(&chat_id.to_string(), &pet_id, &requester.to_string(), &owner.to_string())
            .unwrap();
        chat_id
    }

    fn text(value: serde_json::Value) -> Result<Message, axum::Error> {
        Ok(Message::Text(value.to_string().into()))
    }

    #[tokio::test]
    async fn identify_yields_the_token_subject() {
        let user_id = Uuid::new_v4();
        let mut incoming = stream::iter(vec![
            Ok(Message::Ping(Vec::new().into())),
            text(serde_json::json!({ "type": "Subscribe", "data": { "chat_ids": [] } })),
            text(serde_json::json!({ "type": "Identify", "data": { "token": token("s3cret", user_id) } })),
        ]);

        let identified = wait_for_identify(&mut incoming, "s3cret", Duration::from_secs(1)).await;
        assert_eq!(identified, Some(user_id));
    }

    #[tokio::test]
    async fn identify_with_a_forged_token_is_refused() {
        let mut incoming = stream::iter(vec![text(
            serde_json::json!({ "type": "Identify", "data": { "token": token("other", Uuid::new_v4()) } }),
        )]);
        assert_eq!(wait_for_identify(&mut incoming, "s3cret", Duration::from_secs(1)).await, None);
    }

    #[tokio::test]
    async fn silent_socket_times_out() {
        let mut incoming = stream::pending::<Result<Message, axum::Error>>();
        let identified = wait_for_identify(&mut incoming, "s3cret", Duration::from_millis(20)).await;
        assert_eq!(identified, None);
    }

    #[test]
    fn chat_events_need_a_subscription() {
        let chat_id = Uuid::new_v4();
        let subscriptions: Subscriptions = Arc::new(RwLock::new(HashSet::new()));
        let scoped = BroadcastMessage {
            chat_id: Some(chat_id),
            json: Arc::from("{}"),
        };
        let global = BroadcastMessage {
            chat_id: None,
            json: Arc::from("{}"),
        };

        assert!(!is_followed(&scoped, &subscriptions));
        assert!(is_followed(&global, &subscriptions));

        subscriptions.write().unwrap().insert(chat_id);
        assert!(is_followed(&scoped, &subscriptions));
    }

    #[tokio::test]
    async fn subscribe_replies_with_permitted_chats_only() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let owner = user(&db, "user");
        let requester = user(&db, "user");
        let chat_id = chat_between(&db, owner, requester);
        let foreign = Uuid::new_v4();

        let subscriptions: Subscriptions = Arc::new(RwLock::new(HashSet::from([foreign])));
        let (reply_tx, mut reply_rx) = mpsc::unbounded_channel();
        let cmd = RealtimeCommand::Subscribe {
            chat_ids: vec![chat_id, foreign],
        };
        handle_command(&db, requester, cmd, &subscriptions, &reply_tx).await;

        match reply_rx.recv().await {
            Some(RealtimeEvent::Subscribed { chat_ids }) => assert_eq!(chat_ids, vec![chat_id]),
            other => panic!("expected Subscribed, got {other:?}"),
        }
        assert_eq!(*subscriptions.read().unwrap(), HashSet::from([chat_id]));
    }
}
