//! Handlers behind `/api/admin`. The router wraps all of them in
//! [`crate::middleware::require_admin`].

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::{info, warn};
use uuid::Uuid;

use khvostik_db::models::{ChatRow, PetRow, UserRow};
use khvostik_types::api::{Claims, SetRoleRequest};
use khvostik_types::events::RealtimeEvent;
use khvostik_types::models::ChatStatus;

use crate::chats::{ChatQuery, load_chat, set_status};
use crate::data;
use crate::error::{ApiError, ApiResult};
use crate::pets::{PetQuery, load_pet};
use crate::state::AppState;
use crate::storage::key_from_url;

pub async fn stats(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let stats = state.with_db(|db| db.stats()).await?;
    Ok(data(stats))
}

pub async fn list_users(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let rows = state.with_db(|db| db.list_users()).await?;
    Ok(data(rows.into_iter().map(UserRow::into_user).collect::<Vec<_>>()))
}

pub async fn set_user_role(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SetRoleRequest>,
) -> ApiResult<impl IntoResponse> {
    let uid = user_id.to_string();
    let role = req.role;
    if !state
        .with_db(move |db| db.set_user_role(&uid, role.as_str()))
        .await?
    {
        return Err(ApiError::NotFound("user"));
    }

    info!("Admin {} set role of {} to {}", claims.sub, user_id, role);

    let uid = user_id.to_string();
    let user = state
        .with_db(move |db| db.get_user_by_id(&uid))
        .await?
        .ok_or(ApiError::NotFound("user"))?;
    Ok(data(user.into_user()))
}

/// Removes the account together with its listings, chats and messages.
pub async fn delete_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    if user_id == claims.sub {
        return Err(ApiError::bad_request("cannot delete your own account"));
    }

    // Photo objects are not covered by the cascade.
    let uid = user_id.to_string();
    let owned = state
        .with_db(move |db| {
            db.list_pets(&khvostik_db::PetFilter {
                user_id: Some(uid),
                limit: u32::MAX,
                ..Default::default()
            })
        })
        .await?;

    let uid = user_id.to_string();
    if !state.with_db(move |db| db.delete_user(&uid)).await? {
        return Err(ApiError::NotFound("user"));
    }

    for pet in &owned {
        remove_photo(&state, pet).await;
    }

    info!(
        "Admin {} deleted user {} ({} listings)",
        claims.sub,
        user_id,
        owned.len()
    );
    Ok(StatusCode::NO_CONTENT)
}

/// All listings regardless of status, same filters as the public search.
pub async fn list_pets(
    State(state): State<AppState>,
    Query(query): Query<PetQuery>,
) -> ApiResult<impl IntoResponse> {
    let filter = query.into_filter(None)?;
    let rows = state.with_db(move |db| db.list_pets(&filter)).await?;
    Ok(data(rows.into_iter().map(PetRow::into_listing).collect::<Vec<_>>()))
}

pub async fn delete_pet(
    State(state): State<AppState>,
    Path(pet_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let pet = load_pet(&state, pet_id).await?;

    let pid = pet_id.to_string();
    if !state.with_db(move |db| db.delete_pet(&pid)).await? {
        return Err(ApiError::NotFound("listing"));
    }
    remove_photo(&state, &pet).await;

    info!("Admin {} deleted listing {}", claims.sub, pet_id);
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_chats(
    State(state): State<AppState>,
    Query(query): Query<ChatQuery>,
) -> ApiResult<impl IntoResponse> {
    let status = query.status()?;
    let rows = state
        .with_db(move |db| db.list_chats(status.as_ref().map(ChatStatus::as_str)))
        .await?;
    Ok(data(rows.into_iter().map(ChatRow::into_chat).collect::<Vec<_>>()))
}

pub async fn restore_chat(
    State(state): State<AppState>,
    Path(chat_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let chat = load_chat(&state, chat_id).await?;
    let chat = set_status(&state, chat, ChatStatus::Active).await?;

    info!("Admin {} restored chat {}", claims.sub, chat_id);
    state.dispatcher.broadcast(RealtimeEvent::ChatRestored { chat_id });

    Ok(data(chat))
}

async fn remove_photo(state: &AppState, pet: &PetRow) {
    let Some(key) = pet.photo_url.as_deref().and_then(key_from_url) else {
        return;
    };
    if let Err(e) = state.photos.delete(key).await {
        warn!("Failed to delete photo {} of listing {}: {:#}", key, pet.id, e);
    }
}
