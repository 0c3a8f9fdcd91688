use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{SubsecRound, Utc};
use serde::Deserialize;
use uuid::Uuid;

use khvostik_db::models::{MessageRow, format_timestamp};
use khvostik_types::api::{Claims, SendMessageRequest};
use khvostik_types::events::RealtimeEvent;
use khvostik_types::models::{ChatStatus, Message};

use crate::chats::{ensure_participant_or_admin, load_chat};
use crate::data;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub const MAX_BODY_CHARS: usize = 4000;

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Cursor: the id of the oldest message already loaded.
    pub before: Option<String>,
}

fn default_limit() -> u32 {
    50
}

pub async fn get_messages(
    State(state): State<AppState>,
    Path(chat_id): Path<Uuid>,
    Query(query): Query<MessageQuery>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let chat = load_chat(&state, chat_id).await?;
    ensure_participant_or_admin(&state, &claims, &chat).await?;

    let before = match query.before.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => Some(
            raw.parse::<Uuid>()
                .map_err(|_| ApiError::bad_request("before must be a message id"))?
                .to_string(),
        ),
        None => None,
    };
    let limit = query.limit.clamp(1, 200);

    let cid = chat_id.to_string();
    let rows = state
        .with_db(move |db| {
            if let Some(id) = &before {
                if !db.message_exists(&cid, id)? {
                    return Ok(None);
                }
            }
            db.get_messages(&cid, limit, before.as_deref()).map(Some)
        })
        .await?
        .ok_or_else(|| ApiError::bad_request("before is not a message in this chat"))?;

    Ok(data(rows.into_iter().map(MessageRow::into_message).collect::<Vec<_>>()))
}

/// Participants only. Admins read any chat but don't post into it.
pub async fn send_message(
    State(state): State<AppState>,
    Path(chat_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> ApiResult<impl IntoResponse> {
    let body = req.body.trim();
    if body.is_empty() {
        return Err(ApiError::bad_request("message body is empty"));
    }
    if body.chars().count() > MAX_BODY_CHARS {
        return Err(ApiError::bad_request(format!(
            "message body exceeds {MAX_BODY_CHARS} characters"
        )));
    }

    let chat = load_chat(&state, chat_id).await?;
    if !chat.is_participant(claims.sub) {
        return Err(ApiError::Forbidden);
    }
    if chat.status == ChatStatus::Archived {
        return Err(ApiError::Conflict("chat is archived".into()));
    }

    // Stored timestamps carry milliseconds; the response and event match the row.
    let message = Message {
        id: Uuid::new_v4(),
        chat_id,
        sender_id: claims.sub,
        body: body.to_string(),
        created_at: Utc::now().trunc_subsecs(3),
    };
    let row = MessageRow {
        id: message.id.to_string(),
        chat_id: chat_id.to_string(),
        sender_id: claims.sub.to_string(),
        body: message.body.clone(),
        created_at: format_timestamp(message.created_at),
    };

    state.with_db(move |db| db.insert_message(&row)).await?;

    state.dispatcher.broadcast(RealtimeEvent::MessageCreate {
        message: message.clone(),
    });

    Ok((StatusCode::CREATED, data(message)))
}
