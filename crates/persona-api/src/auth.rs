use std::sync::Arc;

use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::{SaltString, rand_core::OsRng}};
use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};
use axum_extra::extract::cookie::CookieJar;
use tracing::{info, warn};
use uuid::Uuid;

use persona_db::{Database, is_constraint_violation};
use persona_relay::Relay;
use persona_types::api::{Claims, CredentialsRequest, LogoutResponse, MeResponse, SessionResponse, UserSummary};

use crate::error::{ApiError, blocking};
use crate::middleware::{SESSION_COOKIE, SESSION_MAX_AGE_SECS, auth_cookie, expired_cookie, expiry, sign};

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub relay: Relay,
    pub jwt_secret: String,
    pub admin_password: String,
    pub secure_cookies: bool,
}

const MIN_PASSWORD_LEN: usize = 8;

fn normalize_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}

pub async fn signup(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(req): Json<CredentialsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = normalize_email(&req.email);
    if email.is_empty() || req.password.is_empty() {
        return Err(ApiError::bad_request("Email and password are required"));
    }
    if req.password.len() < MIN_PASSWORD_LEN {
        return Err(ApiError::bad_request("Password must be at least 8 characters"));
    }

    let db = state.db.clone();
    let lookup = email.clone();
    if blocking("Failed to create user", move || db.get_user_by_email(&lookup))
        .await?
        .is_some()
    {
        return Err(ApiError::new(StatusCode::CONFLICT, "User already exists"));
    }

    // Hash password with Argon2id
    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|e| ApiError::internal("Failed to create user", e))?
        .to_string();

    let user_id = Uuid::new_v4();
    let db = state.db.clone();
    let (uid, stored_email) = (user_id.to_string(), email.clone());
    // A concurrent signup can still win the race to the UNIQUE index.
    let created = blocking("Failed to create user", move || {
        match db.create_user(&uid, &stored_email, &password_hash) {
            Ok(()) => Ok(true),
            Err(e) if is_constraint_violation(&e) => Ok(false),
            Err(e) => Err(e),
        }
    })
    .await?;
    if !created {
        return Err(ApiError::new(StatusCode::CONFLICT, "User already exists"));
    }

    info!("User {} signed up", user_id);
    start_session(&state, jar, user_id, email, StatusCode::CREATED)
}

pub async fn signin(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(req): Json<CredentialsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = normalize_email(&req.email);
    if email.is_empty() || req.password.is_empty() {
        return Err(ApiError::bad_request("Email and password are required"));
    }

    let db = state.db.clone();
    let user = blocking("Failed to sign in", move || db.get_user_by_email(&email))
        .await?
        .ok_or_else(|| ApiError::unauthorized("Invalid credentials"))?;

    // Verify password
    let parsed_hash =
        PasswordHash::new(&user.password).map_err(|e| ApiError::internal("Failed to sign in", e))?;

    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| ApiError::unauthorized("Invalid credentials"))?;

    let user_id: Uuid = user
        .id
        .parse()
        .map_err(|e| ApiError::internal("Failed to sign in", e))?;

    start_session(&state, jar, user_id, user.email, StatusCode::OK)
}

pub async fn logout(State(state): State<AppState>, jar: CookieJar) -> impl IntoResponse {
    (
        jar.add(expired_cookie(SESSION_COOKIE, state.secure_cookies)),
        Json(LogoutResponse { ok: true }),
    )
}

/// Resolves the session back to a user row, so deleted users are logged out.
pub async fn me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let uid = claims.sub.to_string();
    let user = blocking("Server error", move || db.get_user_by_id(&uid))
        .await?
        .ok_or_else(|| {
            warn!("Session for unknown user {}", claims.sub);
            ApiError::unauthorized("Not authenticated")
        })?;

    Ok(Json(MeResponse {
        user: UserSummary {
            id: claims.sub,
            email: user.email,
        },
    }))
}

fn start_session(
    state: &AppStateInner,
    jar: CookieJar,
    user_id: Uuid,
    email: String,
    status: StatusCode,
) -> Result<(StatusCode, CookieJar, Json<SessionResponse>), ApiError> {
    let claims = Claims {
        sub: user_id,
        email: email.clone(),
        exp: expiry(SESSION_MAX_AGE_SECS),
    };
    let token = sign(&state.jwt_secret, &claims).map_err(|e| ApiError::internal("Failed to create session", e))?;
    let cookie = auth_cookie(SESSION_COOKIE, token, SESSION_MAX_AGE_SECS, state.secure_cookies);

    Ok((
        status,
        jar.add(cookie),
        Json(SessionResponse {
            ok: true,
            user: UserSummary { id: user_id, email },
        }),
    ))
}
