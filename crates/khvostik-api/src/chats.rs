use axum::{
    Extension,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use khvostik_db::models::ChatRow;
use khvostik_types::api::Claims;
use khvostik_types::events::RealtimeEvent;
use khvostik_types::models::{Chat, ChatStatus, PetStatus};

use crate::data;
use crate::error::{ApiError, ApiResult};
use crate::middleware::{ensure_admin, ensure_owner_or_admin};
use crate::pets::{load_pet, owner_of};
use crate::state::{AppState, AppStateInner};

#[derive(Debug, Default, Deserialize)]
pub struct ChatQuery {
    pub status: Option<String>,
}

impl ChatQuery {
    pub(crate) fn status(&self) -> ApiResult<Option<ChatStatus>> {
        match self.status.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(s) => s
                .parse()
                .map(Some)
                .map_err(|e| ApiError::bad_request(format!("status: {e}"))),
        }
    }
}

/// Get-or-create the caller's chat about a listing.
pub async fn open_chat(
    State(state): State<AppState>,
    Path(pet_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let pet = load_pet(&state, pet_id).await?;
    let owner_id = owner_of(&pet);
    if owner_id == claims.sub {
        return Err(ApiError::bad_request("cannot open a chat on your own listing"));
    }

    let pid = pet_id.to_string();
    let uid = claims.sub.to_string();
    if pet.status != PetStatus::Active.as_str() {
        // Existing threads stay reachable after the listing is archived.
        let existing = state.with_db(move |db| db.find_chat(&pid, &uid)).await?;
        return match existing {
            Some(row) => Ok((StatusCode::OK, data(row.into_chat()))),
            None => Err(ApiError::bad_request("listing is archived")),
        };
    }

    let chat_id = Uuid::new_v4().to_string();
    let oid = owner_id.to_string();
    let (row, created) = state
        .with_db(move |db| db.get_or_create_chat(&chat_id, &pid, &uid, &oid))
        .await?;
    let chat = row.into_chat();

    if !created {
        return Ok((StatusCode::OK, data(chat)));
    }

    info!("User {} opened chat {} on listing {}", claims.sub, chat.id, pet_id);
    state
        .dispatcher
        .send_to_user(
            owner_id,
            RealtimeEvent::ChatOpened {
                chat_id: chat.id,
                pet_id,
                user_id: claims.sub,
            },
        )
        .await;

    Ok((StatusCode::CREATED, data(chat)))
}

pub async fn list_my_chats(
    State(state): State<AppState>,
    Query(query): Query<ChatQuery>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let status = query.status()?;
    let uid = claims.sub.to_string();
    let rows = state
        .with_db(move |db| db.list_chats_for_user(&uid, status.as_ref().map(ChatStatus::as_str)))
        .await?;
    Ok(data(rows.into_iter().map(ChatRow::into_chat).collect::<Vec<_>>()))
}

pub async fn get_chat(
    State(state): State<AppState>,
    Path(chat_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let chat = load_chat(&state, chat_id).await?;
    ensure_participant_or_admin(&state, &claims, &chat).await?;
    Ok(data(chat))
}

/// Listing owner or admin. The requester can't close the thread.
pub async fn archive_chat(
    State(state): State<AppState>,
    Path(chat_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let chat = load_chat(&state, chat_id).await?;
    ensure_owner_or_admin(&state, &claims, chat.owner_id).await?;

    let chat = set_status(&state, chat, ChatStatus::Archived).await?;
    info!("User {} archived chat {}", claims.sub, chat_id);
    state.dispatcher.broadcast(RealtimeEvent::ChatArchived { chat_id });

    Ok(data(chat))
}

pub(crate) async fn load_chat(state: &AppStateInner, chat_id: Uuid) -> ApiResult<Chat> {
    let cid = chat_id.to_string();
    state
        .with_db(move |db| db.get_chat(&cid))
        .await?
        .map(ChatRow::into_chat)
        .ok_or(ApiError::NotFound("chat"))
}

pub(crate) async fn ensure_participant_or_admin(state: &AppStateInner, claims: &Claims, chat: &Chat) -> ApiResult<()> {
    if chat.is_participant(claims.sub) {
        return Ok(());
    }
    ensure_admin(state, claims).await
}

pub(crate) async fn set_status(state: &AppStateInner, mut chat: Chat, status: ChatStatus) -> ApiResult<Chat> {
    let cid = chat.id.to_string();
    if !state
        .with_db(move |db| db.set_chat_status(&cid, status.as_str()))
        .await?
    {
        return Err(ApiError::NotFound("chat"));
    }
    chat.status = status;
    Ok(chat)
}
