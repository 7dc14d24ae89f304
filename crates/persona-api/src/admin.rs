use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};
use axum_extra::extract::cookie::CookieJar;
use tracing::{info, warn};

use persona_types::api::{AdminCheckResponse, AdminClaims, AdminLoginRequest, AdminSessionResponse};

use crate::auth::AppState;
use crate::error::ApiError;
use crate::middleware::{ADMIN_COOKIE, ADMIN_MAX_AGE_SECS, auth_cookie, expired_cookie, expiry, is_admin, sign};

/// POST /admin/auth: exchanges the admin password for a signed admin cookie.
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(req): Json<AdminLoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.password.is_empty() || req.password != state.admin_password {
        warn!("Rejected admin login attempt");
        return Err(ApiError::unauthorized("Invalid password"));
    }

    let claims = AdminClaims {
        sub: "admin".to_string(),
        admin: true,
        exp: expiry(ADMIN_MAX_AGE_SECS),
    };
    let token = sign(&state.jwt_secret, &claims)
        .map_err(|e| ApiError::internal("Authentication failed", e))?;

    info!("Admin logged in");
    Ok((
        jar.add(auth_cookie(ADMIN_COOKIE, token, ADMIN_MAX_AGE_SECS, state.secure_cookies)),
        Json(AdminSessionResponse { success: true }),
    ))
}

/// DELETE /admin/auth
pub async fn logout(State(state): State<AppState>, jar: CookieJar) -> impl IntoResponse {
    (
        jar.add(expired_cookie(ADMIN_COOKIE, state.secure_cookies)),
        Json(AdminSessionResponse { success: true }),
    )
}

/// GET /admin/check
pub async fn check(State(state): State<AppState>, jar: CookieJar) -> impl IntoResponse {
    let authenticated = is_admin(&jar, &state.jwt_secret);
    let status = if authenticated {
        StatusCode::OK
    } else {
        StatusCode::UNAUTHORIZED
    };
    (status, Json(AdminCheckResponse { authenticated }))
}
