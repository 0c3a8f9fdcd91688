use std::collections::BTreeMap;

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;

use khvostik_types::api::{Claims, SetSettingRequest};

use crate::data;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

const MAX_KEY_LEN: usize = 64;

/// Public: every setting as a `{ key: value }` map.
pub async fn get_settings(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let settings: BTreeMap<String, String> = state.with_db(|db| db.get_settings()).await?.into_iter().collect();
    Ok(data(settings))
}

pub async fn put_setting(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SetSettingRequest>,
) -> ApiResult<impl IntoResponse> {
    check_key(&key)?;

    let (k, value) = (key.clone(), req.value.clone());
    state.with_db(move |db| db.set_setting(&k, &value)).await?;

    info!("Admin {} set setting '{}'", claims.sub, key);
    Ok(data(BTreeMap::from([(key, req.value)])))
}

pub async fn delete_setting(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let k = key.clone();
    if !state.with_db(move |db| db.delete_setting(&k)).await? {
        return Err(ApiError::NotFound("setting"));
    }

    info!("Admin {} deleted setting '{}'", claims.sub, key);
    Ok(StatusCode::NO_CONTENT)
}

// Keys are short identifiers like `support_phone`.
fn check_key(key: &str) -> ApiResult<()> {
    let valid = !key.is_empty()
        && key.len() <= MAX_KEY_LEN
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.');
    if !valid {
        return Err(ApiError::bad_request("setting key is invalid"));
    }
    Ok(())
}
