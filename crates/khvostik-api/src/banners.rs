use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;
use uuid::Uuid;

use khvostik_db::models::{BannerRow, now_timestamp};
use khvostik_types::api::{Claims, CreateBannerRequest, UpdateBannerRequest};

use crate::data;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Public: active banners in display order.
pub async fn list_active(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let rows = state.with_db(|db| db.list_banners(true)).await?;
    Ok(data(rows.into_iter().map(BannerRow::into_banner).collect::<Vec<_>>()))
}

pub async fn list_all(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let rows = state.with_db(|db| db.list_banners(false)).await?;
    Ok(data(rows.into_iter().map(BannerRow::into_banner).collect::<Vec<_>>()))
}

pub async fn create_banner(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateBannerRequest>,
) -> ApiResult<impl IntoResponse> {
    let row = BannerRow {
        id: Uuid::new_v4().to_string(),
        title: required(&req.title, "title")?,
        image_url: required(&req.image_url, "image_url")?,
        link_url: link(req.link_url),
        position: req.position,
        active: req.active,
        created_at: now_timestamp(),
    };

    let insert = row.clone();
    state.with_db(move |db| db.insert_banner(&insert)).await?;

    info!("Admin {} created banner {}", claims.sub, row.id);
    Ok((StatusCode::CREATED, data(row.into_banner())))
}

pub async fn update_banner(
    State(state): State<AppState>,
    Path(banner_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateBannerRequest>,
) -> ApiResult<impl IntoResponse> {
    let bid = banner_id.to_string();
    let mut row = state
        .with_db(move |db| db.get_banner(&bid))
        .await?
        .ok_or(ApiError::NotFound("banner"))?;

    if let Some(title) = &req.title {
        row.title = required(title, "title")?;
    }
    if let Some(image_url) = &req.image_url {
        row.image_url = required(image_url, "image_url")?;
    }
    if req.link_url.is_some() {
        row.link_url = link(req.link_url);
    }
    if let Some(position) = req.position {
        row.position = position;
    }
    if let Some(active) = req.active {
        row.active = active;
    }

    let update = row.clone();
    if !state.with_db(move |db| db.update_banner(&update)).await? {
        return Err(ApiError::NotFound("banner"));
    }

    info!("Admin {} updated banner {}", claims.sub, banner_id);
    Ok(data(row.into_banner()))
}

pub async fn delete_banner(
    State(state): State<AppState>,
    Path(banner_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let bid = banner_id.to_string();
    if !state.with_db(move |db| db.delete_banner(&bid)).await? {
        return Err(ApiError::NotFound("banner"));
    }

    info!("Admin {} deleted banner {}", claims.sub, banner_id);
    Ok(StatusCode::NO_CONTENT)
}

fn required(value: &str, field: &str) -> ApiResult<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ApiError::bad_request(format!("{field} is required")));
    }
    Ok(value.to_string())
}

fn link(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}
