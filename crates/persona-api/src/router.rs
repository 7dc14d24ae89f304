use axum::{
    Json, Router, middleware,
    response::IntoResponse,
    routing::{get, post},
};

use crate::auth::{self, AppState};
use crate::middleware::{require_admin, require_user};
use crate::{admin, characters, conversation};

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// All HTTP routes. Transport layers (CORS, tracing) are added by the binary.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(health))
        .route("/auth/signup", post(auth::signup))
        .route("/auth/signin", post(auth::signin))
        .route("/auth/logout", post(auth::logout))
        .route("/admin/auth", post(admin::login).delete(admin::logout))
        .route("/admin/check", get(admin::check))
        .route("/characters", get(characters::list))
        .route("/characters/{id}", get(characters::get))
        .with_state(state.clone());

    let admin_routes = Router::new()
        .route("/characters", post(characters::create))
        .route(
            "/characters/{id}",
            axum::routing::put(characters::update).delete(characters::delete),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), require_admin))
        .with_state(state.clone());

    let user_routes = Router::new()
        .route("/auth/me", get(auth::me))
        .route(
            "/conversation/{character_id}",
            get(conversation::get_conversation)
                .post(conversation::send_message)
                .delete(conversation::clear_conversation),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), require_user))
        .with_state(state);

    Router::new()
        .merge(public_routes)
        .merge(admin_routes)
        .merge(user_routes)
}
