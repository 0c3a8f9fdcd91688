use axum::{
    Extension, Json,
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use khvostik_db::PetFilter;
use khvostik_db::models::{PetRow, now_timestamp};
use khvostik_types::api::{Claims, CreatePetRequest, UpdatePetRequest};
use khvostik_types::models::{PetKind, PetStatus, coordinates_valid};

use crate::data;
use crate::error::{ApiError, ApiResult};
use crate::middleware::ensure_owner_or_admin;
use crate::state::{AppState, AppStateInner};
use crate::storage::{MAX_PHOTO_SIZE, extension_for, key_from_url, photo_url};

const DEFAULT_LIMIT: u32 = 50;
const MAX_LIMIT: u32 = 200;

#[derive(Debug, Default, Deserialize)]
pub struct PetQuery {
    pub kind: Option<String>,
    pub species: Option<String>,
    pub status: Option<String>,
    pub q: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl PetQuery {
    /// Validates the query string. `default_status` applies when the caller
    /// did not ask for a status.
    pub(crate) fn into_filter(self, default_status: Option<PetStatus>) -> ApiResult<PetFilter> {
        let kind = match non_blank(self.kind) {
            Some(k) => Some(
                k.parse::<PetKind>()
                    .map_err(|e| ApiError::bad_request(format!("kind: {e}")))?,
            ),
            None => None,
        };
        let status = match non_blank(self.status) {
            Some(s) => Some(
                s.parse::<PetStatus>()
                    .map_err(|e| ApiError::bad_request(format!("status: {e}")))?,
            ),
            None => default_status,
        };

        Ok(PetFilter {
            kind: kind.map(|k| k.as_str().to_string()),
            species: non_blank(self.species),
            status: status.map(|s| s.as_str().to_string()),
            user_id: None,
            query: non_blank(self.q),
            limit: self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT),
            offset: self.offset.unwrap_or(0),
        })
    }
}

pub async fn list_pets(
    State(state): State<AppState>,
    Query(query): Query<PetQuery>,
) -> ApiResult<impl IntoResponse> {
    let filter = query.into_filter(Some(PetStatus::Active))?;
    let rows = state.with_db(move |db| db.list_pets(&filter)).await?;
    Ok(data(rows.into_iter().map(PetRow::into_listing).collect::<Vec<_>>()))
}

pub async fn get_pet(State(state): State<AppState>, Path(pet_id): Path<Uuid>) -> ApiResult<impl IntoResponse> {
    let row = load_pet(&state, pet_id).await?;
    Ok(data(row.into_listing()))
}

/// Every listing the caller owns, any status.
pub async fn my_pets(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let filter = PetFilter {
        user_id: Some(claims.sub.to_string()),
        limit: u32::MAX,
        ..Default::default()
    };
    let rows = state.with_db(move |db| db.list_pets(&filter)).await?;
    Ok(data(rows.into_iter().map(PetRow::into_listing).collect::<Vec<_>>()))
}

pub async fn create_pet(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreatePetRequest>,
) -> ApiResult<impl IntoResponse> {
    let species = required(&req.species, "species")?;
    let location = required(&req.location, "location")?;
    let contact_name = required(&req.contact_name, "contact_name")?;
    let contact_phone = required(&req.contact_phone, "contact_phone")?;
    check_reward(req.reward)?;

    let coordinates = match explicit_coordinates(req.latitude, req.longitude)? {
        Some(coords) => Some(coords),
        None => resolve_location(&state, &location).await,
    };

    let now = now_timestamp();
    let row = PetRow {
        id: Uuid::new_v4().to_string(),
        kind: req.kind.as_str().to_string(),
        species,
        breed: optional_text(req.breed),
        name: optional_text(req.name),
        description: optional_text(req.description),
        color: optional_text(req.color),
        location,
        latitude: coordinates.map(|(lat, _)| lat),
        longitude: coordinates.map(|(_, lon)| lon),
        contact_name,
        contact_phone,
        reward: req.reward,
        photo_url: None,
        status: PetStatus::Active.as_str().to_string(),
        user_id: claims.sub.to_string(),
        created_at: now.clone(),
        updated_at: now,
    };

    let insert = row.clone();
    state.with_db(move |db| db.insert_pet(&insert)).await?;

    info!("User {} created listing {} ({})", claims.sub, row.id, row.kind);
    Ok((StatusCode::CREATED, data(row.into_listing())))
}

pub async fn update_pet(
    State(state): State<AppState>,
    Path(pet_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdatePetRequest>,
) -> ApiResult<impl IntoResponse> {
    let mut row = load_pet(&state, pet_id).await?;
    ensure_owner_or_admin(&state, &claims, owner_of(&row)).await?;

    if let Some(kind) = req.kind {
        row.kind = kind.as_str().to_string();
    }
    if let Some(species) = &req.species {
        row.species = required(species, "species")?;
    }
    if let Some(contact_name) = &req.contact_name {
        row.contact_name = required(contact_name, "contact_name")?;
    }
    if let Some(contact_phone) = &req.contact_phone {
        row.contact_phone = required(contact_phone, "contact_phone")?;
    }
    if req.breed.is_some() {
        row.breed = optional_text(req.breed);
    }
    if req.name.is_some() {
        row.name = optional_text(req.name);
    }
    if req.description.is_some() {
        row.description = optional_text(req.description);
    }
    if req.color.is_some() {
        row.color = optional_text(req.color);
    }
    if req.reward.is_some() {
        check_reward(req.reward)?;
        row.reward = req.reward;
    }
    if let Some(status) = req.status {
        row.status = status.as_str().to_string();
    }

    let explicit = explicit_coordinates(req.latitude, req.longitude)?;
    let new_location = match &req.location {
        Some(location) => Some(required(location, "location")?),
        None => None,
    };

    match (explicit, new_location) {
        (Some((lat, lon)), location) => {
            row.latitude = Some(lat);
            row.longitude = Some(lon);
            if let Some(location) = location {
                row.location = location;
            }
        }
        (None, Some(location)) if location != row.location => {
            // stale coordinates would point at the old place
            let coordinates = resolve_location(&state, &location).await;
            row.latitude = coordinates.map(|(lat, _)| lat);
            row.longitude = coordinates.map(|(_, lon)| lon);
            row.location = location;
        }
        _ => {}
    }

    let update = row.clone();
    if !state.with_db(move |db| db.update_pet(&update)).await? {
        return Err(ApiError::NotFound("listing"));
    }

    // Re-read so updated_at reflects the write.
    let row = load_pet(&state, pet_id).await?;
    info!("User {} updated listing {}", claims.sub, pet_id);
    Ok(data(row.into_listing()))
}

pub async fn archive_pet(
    State(state): State<AppState>,
    Path(pet_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let row = load_pet(&state, pet_id).await?;
    ensure_owner_or_admin(&state, &claims, owner_of(&row)).await?;

    let pid = pet_id.to_string();
    state
        .with_db(move |db| db.set_pet_status(&pid, PetStatus::Archived.as_str()))
        .await?;

    info!("User {} archived listing {}", claims.sub, pet_id);
    let row = load_pet(&state, pet_id).await?;
    Ok(data(row.into_listing()))
}

/// Raw image body; the content type picks the stored extension.
pub async fn upload_photo(
    State(state): State<AppState>,
    Path(pet_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let row = load_pet(&state, pet_id).await?;
    ensure_owner_or_admin(&state, &claims, owner_of(&row)).await?;

    if body.len() > MAX_PHOTO_SIZE {
        return Err(ApiError::PayloadTooLarge(MAX_PHOTO_SIZE));
    }
    if body.is_empty() {
        return Err(ApiError::bad_request("photo is empty"));
    }

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let ext = extension_for(content_type)
        .ok_or_else(|| ApiError::bad_request("photo must be image/jpeg, image/png, image/webp or image/gif"))?;

    let key = state.photos.put(pet_id, ext, &body).await?;
    let url = photo_url(&key);

    let pid = pet_id.to_string();
    let new_url = url.clone();
    state.with_db(move |db| db.set_pet_photo(&pid, &new_url)).await?;

    if let Some(old_key) = row.photo_url.as_deref().and_then(key_from_url) {
        if old_key != key {
            if let Err(e) = state.photos.delete(old_key).await {
                warn!("Failed to delete replaced photo {}: {:#}", old_key, e);
            }
        }
    }

    info!("User {} uploaded photo for listing {}", claims.sub, pet_id);
    let row = load_pet(&state, pet_id).await?;
    Ok(data(row.into_listing()))
}

pub(crate) async fn load_pet(state: &AppStateInner, pet_id: Uuid) -> ApiResult<PetRow> {
    let pid = pet_id.to_string();
    state
        .with_db(move |db| db.get_pet(&pid))
        .await?
        .ok_or(ApiError::NotFound("listing"))
}

pub(crate) fn owner_of(row: &PetRow) -> Uuid {
    row.user_id.parse().unwrap_or_default()
}

/// Runs the resolver over a listing's location. Any failure leaves the
/// listing without coordinates.
async fn resolve_location(state: &AppStateInner, location: &str) -> Option<(f64, f64)> {
    match state.resolver.resolve(location).await {
        Ok(Some(resolved)) => Some((resolved.latitude, resolved.longitude)),
        Ok(None) => None,
        Err(e) => {
            warn!("Could not resolve listing location '{}': {}", location, e);
            None
        }
    }
}

/// Both coordinates or neither.
fn explicit_coordinates(latitude: Option<f64>, longitude: Option<f64>) -> ApiResult<Option<(f64, f64)>> {
    match (latitude, longitude) {
        (Some(lat), Some(lon)) if coordinates_valid(lat, lon) => Ok(Some((lat, lon))),
        (Some(_), Some(_)) => Err(ApiError::bad_request("coordinates are out of range")),
        (None, None) => Ok(None),
        _ => Err(ApiError::bad_request("latitude and longitude must be given together")),
    }
}

fn check_reward(reward: Option<i64>) -> ApiResult<()> {
    if reward.is_some_and(|r| r < 0) {
        return Err(ApiError::bad_request("reward must not be negative"));
    }
    Ok(())
}

fn required(value: &str, field: &str) -> ApiResult<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ApiError::bad_request(format!("{field} is required")));
    }
    Ok(value.to_string())
}

/// Trimmed text; blank clears the field.
fn optional_text(value: Option<String>) -> Option<String> {
    non_blank(value)
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinates_come_in_pairs() {
        assert_eq!(explicit_coordinates(None, None).unwrap(), None);
        assert_eq!(
            explicit_coordinates(Some(44.9), Some(37.3)).unwrap(),
            Some((44.9, 37.3))
        );
        assert!(explicit_coordinates(Some(44.9), None).is_err());
        assert!(explicit_coordinates(None, Some(37.3)).is_err());
        assert!(explicit_coordinates(Some(91.0), Some(37.3)).is_err());
        assert!(explicit_coordinates(Some(44.9), Some(-181.0)).is_err());
    }

    #[test]
    fn query_defaults_to_active_listings() {
        let filter = PetQuery::default().into_filter(Some(PetStatus::Active)).unwrap();
        assert_eq!(filter.status.as_deref(), Some("active"));
        assert_eq!(filter.limit, DEFAULT_LIMIT);

        let filter = PetQuery {
            status: Some("archived".into()),
            limit: Some(10_000),
            q: Some("   ".into()),
            ..Default::default()
        }
        .into_filter(Some(PetStatus::Active))
        .unwrap();
        assert_eq!(filter.status.as_deref(), Some("archived"));
        assert_eq!(filter.limit, MAX_LIMIT);
        assert_eq!(filter.query, None);
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let query = PetQuery {
            kind: Some("stolen".into()),
            ..Default::default()
        };
        assert!(query.into_filter(None).is_err());
    }

    #[test]
    fn text_fields() {
        assert!(required("  ", "species").is_err());
        assert_eq!(required(" кошка ", "species").unwrap(), "кошка");
        assert_eq!(optional_text(Some("".into())), None);
        assert_eq!(optional_text(Some(" Мурка ".into())), Some("Мурка".into()));
        assert!(check_reward(Some(-1)).is_err());
        assert!(check_reward(Some(0)).is_ok());
    }
}
