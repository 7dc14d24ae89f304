use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use persona_types::api::{AdminClaims, Claims};
use serde::{Serialize, de::DeserializeOwned};

use crate::auth::AppState;
use crate::error::ApiError;

pub const SESSION_COOKIE: &str = "user_session";
pub const ADMIN_COOKIE: &str = "admin_auth";

pub const SESSION_MAX_AGE_SECS: i64 = 60 * 60 * 24 * 30;
pub const ADMIN_MAX_AGE_SECS: i64 = 60 * 60 * 24 * 7;

pub fn sign<C: Serialize>(secret: &str, claims: &C) -> anyhow::Result<String> {
    Ok(encode(
        &Header::default(),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?)
}

pub fn verify<C: DeserializeOwned>(secret: &str, token: &str) -> Option<C> {
    decode::<C>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .ok()
    .map(|data| data.claims)
}

pub fn expiry(max_age_secs: i64) -> usize {
    (chrono::Utc::now() + chrono::Duration::seconds(max_age_secs)).timestamp() as usize
}

/// HttpOnly, same-site cookie scoped to the whole site.
pub fn auth_cookie(name: &'static str, value: String, max_age_secs: i64, secure: bool) -> Cookie<'static> {
    Cookie::build((name, value))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Strict)
        .secure(secure)
        .max_age(time::Duration::seconds(max_age_secs))
        .build()
}

/// Overwrites `name` with an empty, already-expired cookie.
pub fn expired_cookie(name: &'static str, secure: bool) -> Cookie<'static> {
    Cookie::build(name)
        .path("/")
        .http_only(true)
        .same_site(SameSite::Strict)
        .secure(secure)
        .removal()
        .build()
}

/// Decodes the user session cookie, if any.
pub fn session_claims(jar: &CookieJar, secret: &str) -> Option<Claims> {
    let token = jar.get(SESSION_COOKIE)?;
    verify::<Claims>(secret, token.value())
}

pub fn is_admin(jar: &CookieJar, secret: &str) -> bool {
    jar.get(ADMIN_COOKIE)
        .and_then(|c| verify::<AdminClaims>(secret, c.value()))
        .is_some_and(|claims| claims.admin)
}

/// Validates the `user_session` cookie and exposes its claims to handlers.
pub async fn require_user(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let jar = CookieJar::from_headers(req.headers());
    let claims = session_claims(&jar, &state.jwt_secret)
        .ok_or_else(|| ApiError::unauthorized("Not authenticated"))?;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

/// Only lets requests carrying a valid admin cookie through.
pub async fn require_admin(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let jar = CookieJar::from_headers(req.headers());
    if !is_admin(&jar, &state.jwt_secret) {
        return Err(ApiError::unauthorized("Admin authentication required"));
    }
    Ok(next.run(req).await)
}
