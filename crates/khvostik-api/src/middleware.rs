use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::headers::{Authorization, HeaderMapExt, authorization::Bearer};
use jsonwebtoken::{DecodingKey, Validation, decode};
use uuid::Uuid;

use khvostik_types::api::Claims;
use khvostik_types::models::Role;

use crate::error::{ApiError, ApiResult};
use crate::state::{AppState, AppStateInner};

/// Extract and validate the bearer JWT; stores the [`Claims`] as a request
/// extension for the handlers behind it.
pub async fn require_auth(State(state): State<AppState>, mut req: Request, next: Next) -> ApiResult<Response> {
    let bearer = req
        .headers()
        .typed_get::<Authorization<Bearer>>()
        .ok_or(ApiError::Unauthorized)?;

    let claims = decode_claims(bearer.token(), &state.jwt_secret)?;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

/// Admin gate. Must sit behind [`require_auth`]. The role is read from the
/// database, not from the token, so role changes apply immediately.
pub async fn require_admin(State(state): State<AppState>, req: Request, next: Next) -> ApiResult<Response> {
    let claims = req
        .extensions()
        .get::<Claims>()
        .cloned()
        .ok_or(ApiError::Unauthorized)?;

    match current_role(&state, claims.sub).await? {
        Some(role) if role.is_admin() => Ok(next.run(req).await),
        Some(_) => Err(ApiError::Forbidden),
        // token outlived its account
        None => Err(ApiError::Unauthorized),
    }
}

pub fn decode_claims(token: &str, secret: &str) -> ApiResult<Claims> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| ApiError::Unauthorized)?;

    Ok(token_data.claims)
}

/// The stored role of a user, `None` if the account no longer exists.
pub async fn current_role(state: &AppStateInner, user_id: Uuid) -> ApiResult<Option<Role>> {
    state
        .with_db(move |db| Ok(db.get_user_by_id(&user_id.to_string())?.map(|u| u.role())))
        .await
}

/// Passes if the caller owns the resource or is an admin.
pub async fn ensure_owner_or_admin(state: &AppStateInner, claims: &Claims, owner_id: Uuid) -> ApiResult<()> {
    if claims.sub == owner_id {
        return Ok(());
    }
    ensure_admin(state, claims).await
}

pub async fn ensure_admin(state: &AppStateInner, claims: &Claims) -> ApiResult<()> {
    match current_role(state, claims.sub).await? {
        Some(role) if role.is_admin() => Ok(()),
        _ => Err(ApiError::Forbidden),
    }
}
