use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};

use persona_relay::StoredTurn;
use persona_types::api::{
    Claims, ClearConversationResponse, SendMessageRequest, SendMessageResponse, TurnResponse,
};

use crate::auth::AppState;
use crate::characters::parse_character_id;
use crate::error::ApiError;

fn to_response(turn: StoredTurn) -> TurnResponse {
    TurnResponse {
        id: turn.id,
        character_id: turn.character_id,
        role: turn.effective_role(),
        content: turn.content,
        created_at: turn.created_at,
    }
}

/// GET /conversation/{character_id}: the caller's turns, oldest first.
pub async fn get_conversation(
    State(state): State<AppState>,
    Path(character_id): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let character_id = parse_character_id(&character_id)?;
    let turns = state.relay.conversation(character_id, claims.sub).await?;
    Ok(Json(turns.into_iter().map(to_response).collect::<Vec<_>>()))
}

/// POST /conversation/{character_id}: relays `content` and returns the reply.
pub async fn send_message(
    State(state): State<AppState>,
    Path(character_id): Path<String>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let character_id = parse_character_id(&character_id)?;
    if req.content.trim().is_empty() {
        return Err(ApiError::bad_request("Message content is required"));
    }

    let reply = state
        .relay
        .relay(character_id, claims.sub, &req.content)
        .await?;

    Ok(Json(SendMessageResponse { message: reply }))
}

/// DELETE /conversation/{character_id}: forgets the caller's turns.
pub async fn clear_conversation(
    State(state): State<AppState>,
    Path(character_id): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let character_id = parse_character_id(&character_id)?;
    let deleted = state.relay.clear(character_id, claims.sub).await?;
    Ok(Json(ClearConversationResponse { deleted }))
}
