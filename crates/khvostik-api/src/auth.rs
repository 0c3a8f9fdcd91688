use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{Duration, Utc};
use jsonwebtoken::{EncodingKey, Header, encode};
use rand::Rng;
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use uuid::Uuid;

use khvostik_db::models::{UserRow, format_timestamp, now_timestamp};
use khvostik_types::api::{
    AuthResponse, Claims, LoginRequest, PasswordResetConfirm, PasswordResetRequest, RegisterRequest,
};
use khvostik_types::models::Role;

use crate::data;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

const MIN_PASSWORD_LEN: usize = 8;
const TOKEN_TTL_DAYS: i64 = 30;
const RESET_TTL_HOURS: i64 = 1;

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<impl IntoResponse> {
    let email = normalize_email(&req.email)?;
    let name = req.name.trim().to_string();
    if name.is_empty() || name.chars().count() > 100 {
        return Err(ApiError::bad_request("name must be 1-100 characters"));
    }
    check_password(&req.password)?;

    let password_hash = hash_password(&req.password)?;

    let role = if state.admin_email.as_deref() == Some(email.as_str()) {
        info!("Registering bootstrap admin {}", email);
        Role::Admin
    } else {
        Role::User
    };

    let user_id = Uuid::new_v4();
    let row = UserRow {
        id: user_id.to_string(),
        email: email.clone(),
        name,
        password: password_hash,
        role: role.as_str().to_string(),
        created_at: now_timestamp(),
    };
    if !state.with_db(move |db| db.create_user(&row)).await? {
        return Err(ApiError::Conflict("email is already registered".into()));
    }

    let token = create_token(&state.jwt_secret, user_id, &email, role)?;

    Ok((
        StatusCode::CREATED,
        data(AuthResponse {
            user_id,
            email,
            role,
            token,
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<impl IntoResponse> {
    let email = req.email.trim().to_lowercase();
    let user = state
        .with_db(move |db| db.get_user_by_email(&email))
        .await?
        .ok_or(ApiError::Unauthorized)?;

    // Verify password
    let parsed_hash =
        PasswordHash::new(&user.password).map_err(|e| anyhow::anyhow!("stored hash unreadable: {}", e))?;

    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| ApiError::Unauthorized)?;

    let role = user.role();
    let user = user.into_user();
    let token = create_token(&state.jwt_secret, user.id, &user.email, role)?;

    Ok(data(AuthResponse {
        user_id: user.id,
        email: user.email,
        role,
        token,
    }))
}

pub async fn me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let uid = claims.sub.to_string();
    let user = state
        .with_db(move |db| db.get_user_by_id(&uid))
        .await?
        .ok_or(ApiError::NotFound("user"))?;

    Ok(data(user.into_user()))
}

/// Always answers 202 so the endpoint can't be used to probe for accounts.
/// Mail delivery is out of scope: the link is written to the log.
pub async fn request_password_reset(
    State(state): State<AppState>,
    Json(req): Json<PasswordResetRequest>,
) -> ApiResult<impl IntoResponse> {
    let email = req.email.trim().to_lowercase();
    let user = state.with_db(move |db| db.get_user_by_email(&email)).await?;

    if let Some(user) = user {
        let token = generate_reset_token();
        let token_hash = hash_reset_token(&token);
        let expires_at = format_timestamp(Utc::now() + Duration::hours(RESET_TTL_HOURS));
        let uid = user.id.clone();
        state
            .with_db(move |db| db.insert_password_reset(&token_hash, &uid, &expires_at))
            .await?;

        info!(
            "Password reset for {}: {}/reset-password?token={}",
            user.email, state.public_url, token
        );
    }

    Ok((StatusCode::ACCEPTED, data(serde_json::json!({ "requested": true }))))
}

pub async fn confirm_password_reset(
    State(state): State<AppState>,
    Json(req): Json<PasswordResetConfirm>,
) -> ApiResult<impl IntoResponse> {
    check_password(&req.password)?;

    let token_hash = hash_reset_token(req.token.trim());
    let now = now_timestamp();
    let user_id = state
        .with_db(move |db| db.consume_password_reset(&token_hash, &now))
        .await?
        .ok_or_else(|| {
            warn!("Rejected unknown or expired password reset token");
            ApiError::bad_request("reset token is invalid or expired")
        })?;

    let password_hash = hash_password(&req.password)?;
    let uid = user_id.clone();
    state
        .with_db(move |db| db.update_password(&uid, &password_hash))
        .await?;

    info!("Password reset completed for user {}", user_id);
    Ok(data(serde_json::json!({ "reset": true })))
}

pub fn create_token(secret: &str, user_id: Uuid, email: &str, role: Role) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id,
        email: email.to_string(),
        role,
        exp: (Utc::now() + Duration::days(TOKEN_TTL_DAYS)).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}

fn normalize_email(raw: &str) -> ApiResult<String> {
    let email = raw.trim().to_lowercase();
    let valid = email.len() <= 254
        && email
            .split_once('@')
            .is_some_and(|(local, domain)| !local.is_empty() && !domain.is_empty());
    if !valid {
        return Err(ApiError::bad_request("email is invalid"));
    }
    Ok(email)
}

fn check_password(password: &str) -> ApiResult<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::bad_request(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

/// Hash password with Argon2id
fn hash_password(password: &str) -> ApiResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("password hashing failed: {}", e))?
        .to_string();
    Ok(hash)
}

fn generate_reset_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

// Only the digest is stored, so a leaked table can't reset passwords.
fn hash_reset_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}
