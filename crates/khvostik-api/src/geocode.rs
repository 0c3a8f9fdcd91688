use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;

use khvostik_types::api::GeocodeResponse;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct GeocodeQuery {
    pub address: Option<String>,
}

/// Answers outside the `{ data }` envelope: `{ success, ... }`.
pub async fn geocode(State(state): State<AppState>, Query(query): Query<GeocodeQuery>) -> impl IntoResponse {
    let address = query.address.unwrap_or_default();

    match state.resolver.resolve(&address).await {
        Err(e) => miss(StatusCode::BAD_REQUEST, e.to_string()),
        Ok(None) => miss(StatusCode::NOT_FOUND, format!("address '{}' not found", address.trim())),
        Ok(Some(resolved)) => (
            StatusCode::OK,
            Json(GeocodeResponse::Hit {
                success: true,
                address: address.trim().to_string(),
                found: resolved.found(),
                location: resolved.location,
                latitude: resolved.latitude,
                longitude: resolved.longitude,
            }),
        ),
    }
}

fn miss(status: StatusCode, error: String) -> (StatusCode, Json<GeocodeResponse>) {
    (status, Json(GeocodeResponse::Miss { success: false, error }))
}
