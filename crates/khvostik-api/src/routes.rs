use axum::{
    Router,
    extract::{DefaultBodyLimit, State, WebSocketUpgrade},
    middleware,
    response::IntoResponse,
    routing::{delete, get, patch, post, put},
};
use tower_http::services::ServeDir;

use khvostik_gateway::connection;

use crate::middleware::{require_admin, require_auth};
use crate::state::AppState;
use crate::storage::MAX_PHOTO_SIZE;
use crate::{admin, auth, banners, chats, geocode, messages, pets, settings};

/// Photo uploads plus some slack for headers and JSON bodies.
const BODY_LIMIT: usize = MAX_PHOTO_SIZE + 2 * 1024 * 1024;

/// The whole HTTP surface. CORS and request tracing are layered on by the
/// binary.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/api/auth/register", post(auth::register))
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/password-reset", post(auth::request_password_reset))
        .route("/api/auth/password-reset/confirm", post(auth::confirm_password_reset))
        .route("/api/pets", get(pets::list_pets))
        .route("/api/pets/{pet_id}", get(pets::get_pet))
        .route("/api/banners", get(banners::list_active))
        .route("/api/settings", get(settings::get_settings))
        .route("/api/geocode", get(geocode::geocode))
        .route("/api/realtime", get(ws_upgrade))
        .route("/health", get(|| async { "ok" }));

    let protected_routes = Router::new()
        .route("/api/auth/me", get(auth::me))
        .route("/api/me/pets", get(pets::my_pets))
        .route("/api/pets", post(pets::create_pet))
        .route("/api/pets/{pet_id}", patch(pets::update_pet))
        .route("/api/pets/{pet_id}/archive", post(pets::archive_pet))
        .route("/api/pets/{pet_id}/photo", post(pets::upload_photo))
        .route("/api/pets/{pet_id}/chats", post(chats::open_chat))
        .route("/api/chats", get(chats::list_my_chats))
        .route("/api/chats/{chat_id}", get(chats::get_chat))
        .route("/api/chats/{chat_id}/archive", post(chats::archive_chat))
        .route("/api/chats/{chat_id}/messages", get(messages::get_messages))
        .route("/api/chats/{chat_id}/messages", post(messages::send_message))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    // Layers run bottom-up: auth first, then the admin check.
    let admin_routes = Router::new()
        .route("/stats", get(admin::stats))
        .route("/users", get(admin::list_users))
        .route("/users/{user_id}", delete(admin::delete_user))
        .route("/users/{user_id}/role", put(admin::set_user_role))
        .route("/pets", get(admin::list_pets))
        .route("/pets/{pet_id}", delete(admin::delete_pet))
        .route("/chats", get(admin::list_chats))
        .route("/chats/{chat_id}/restore", post(admin::restore_chat))
        .route("/banners", get(banners::list_all).post(banners::create_banner))
        .route(
            "/banners/{banner_id}",
            patch(banners::update_banner).delete(banners::delete_banner),
        )
        .route(
            "/settings/{key}",
            put(settings::put_setting).delete(settings::delete_setting),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), require_admin))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .nest("/api/admin", admin_routes)
        .nest_service("/media", ServeDir::new(state.photos.dir()))
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .with_state(state)
}

async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        connection::handle_connection(
            socket,
            state.dispatcher.clone(),
            state.db.clone(),
            state.jwt_secret.clone(),
        )
    })
}
