use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};
use tracing::{info, warn};
use uuid::Uuid;

use persona_db::models::{CharacterChanges, CharacterRow};
use persona_db::queries::now_timestamp;
use persona_relay::store::parse_timestamp;
use persona_types::api::{CharacterDeletedResponse, CharacterRequest};
use persona_types::models::Character;

use crate::auth::AppState;
use crate::error::{ApiError, blocking};

fn to_character(row: CharacterRow) -> Character {
    let timestamp = |value: &str, column: &str| {
        parse_timestamp(value).unwrap_or_else(|| {
            warn!("Corrupt {} '{}' on character '{}'", column, value, row.id);
            chrono::DateTime::default()
        })
    };

    Character {
        id: row.id.parse().unwrap_or_else(|e| {
            warn!("Corrupt character id '{}': {}", row.id, e);
            Uuid::default()
        }),
        created_at: timestamp(&row.created_at, "created_at"),
        updated_at: timestamp(&row.updated_at, "updated_at"),
        name: row.name,
        description: row.description,
        image: row.image,
        base_prompt: row.base_prompt,
        greeting_text: row.greeting_text,
    }
}

/// An id that is not a UUID names no character, so it is a 404 like any
/// other unknown id.
pub fn parse_character_id(raw: &str) -> Result<Uuid, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::not_found("Character not found"))
}

/// Empty strings count as missing, as they do for form submissions.
fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// GET /characters
pub async fn list(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let rows = blocking("Failed to fetch characters", move || db.list_characters()).await?;
    Ok(Json(rows.into_iter().map(to_character).collect::<Vec<_>>()))
}

/// GET /characters/{id}
pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_character_id(&id)?;
    let db = state.db.clone();
    let row = blocking("Failed to fetch character", move || db.get_character(&id.to_string()))
        .await?
        .ok_or_else(|| ApiError::not_found("Character not found"))?;
    Ok(Json(to_character(row)))
}

/// POST /characters: admin only.
pub async fn create(
    State(state): State<AppState>,
    Json(req): Json<CharacterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.name.trim().is_empty() {
        return Err(ApiError::bad_request("Character name is required"));
    }
    if req.description.trim().is_empty() {
        return Err(ApiError::bad_request("Description is required"));
    }
    let image = non_empty(req.image).ok_or_else(|| ApiError::bad_request("Image is required"))?;

    let now = now_timestamp();
    let row = CharacterRow {
        id: Uuid::new_v4().to_string(),
        name: req.name,
        description: req.description,
        image,
        base_prompt: req.base_prompt,
        greeting_text: req.greeting_text,
        created_at: now.clone(),
        updated_at: now,
    };

    let db = state.db.clone();
    let insert = row.clone();
    blocking("Failed to create character", move || db.create_character(&insert)).await?;

    info!("Character {} ({}) created", row.id, row.name);
    Ok(Json(to_character(row)))
}

/// PUT /characters/{id}: admin only. An empty image keeps the current one.
pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<CharacterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_character_id(&id)?;
    if req.name.trim().is_empty() || req.description.trim().is_empty() {
        return Err(ApiError::bad_request("Name and description are required"));
    }

    let db = state.db.clone();
    let row = blocking("Failed to update character", move || {
        let image = non_empty(req.image);
        db.update_character(
            &id.to_string(),
            &CharacterChanges {
                name: &req.name,
                description: &req.description,
                image: image.as_deref(),
                base_prompt: &req.base_prompt,
                greeting_text: &req.greeting_text,
            },
        )
    })
    .await?
    .ok_or_else(|| ApiError::not_found("Character not found"))?;

    info!("Character {} updated", id);
    Ok(Json(to_character(row)))
}

/// DELETE /characters/{id}: admin only. Conversations go with it.
pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_character_id(&id)?;
    let db = state.db.clone();
    let deleted = blocking("Failed to delete character", move || db.delete_character(&id.to_string())).await?;
    if !deleted {
        return Err(ApiError::not_found("Character not found"));
    }

    info!("Character {} deleted", id);
    Ok(Json(CharacterDeletedResponse {
        message: "Character deleted".to_string(),
    }))
}
