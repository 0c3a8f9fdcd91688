pub mod admin;
pub mod auth;
pub mod banners;
pub mod chats;
pub mod error;
pub mod geocode;
pub mod messages;
pub mod middleware;
pub mod pets;
pub mod routes;
pub mod settings;
pub mod state;
pub mod storage;

use axum::Json;
use khvostik_types::api::DataResponse;

/// Wraps a successful payload as `{ "data": ... }`.
pub(crate) fn data<T>(data: T) -> Json<DataResponse<T>> {
    Json(DataResponse { data })
}
