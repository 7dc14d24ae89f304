use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use persona_api::{AppStateInner, router};
use persona_db::Database;
use persona_relay::{BackendError, ChatBackend, HistoryEntry, Relay, RetryPolicy, SqliteStore};

const ADMIN_PASSWORD: &str = "letmein-admin";

struct ScriptedBackend {
    script: Mutex<VecDeque<Result<String, BackendError>>>,
    calls: Mutex<Vec<Vec<HistoryEntry>>>,
}

#[async_trait::async_trait]
impl ChatBackend for ScriptedBackend {
    async fn generate(&self, contents: &[HistoryEntry]) -> Result<String, BackendError> {
        self.calls.lock().unwrap().push(contents.to_vec());
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok("default reply".to_string()))
    }
}

fn app(script: Vec<Result<String, BackendError>>) -> (Router, Arc<ScriptedBackend>) {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let backend = Arc::new(ScriptedBackend {
        script: Mutex::new(script.into()),
        calls: Mutex::new(Vec::new()),
    });
    let relay = Relay::new(
        Arc::new(SqliteStore::new(db.clone())),
        backend.clone(),
        RetryPolicy::new(3, Duration::from_millis(1)),
    );
    let state = Arc::new(AppStateInner {
        db,
        relay,
        jwt_secret: "test-secret".into(),
        admin_password: ADMIN_PASSWORD.into(),
        secure_cookies: false,
    });
    (router(state), backend)
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    cookie: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Option<String>, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let set_cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .map(|v| v.to_str().unwrap().split(';').next().unwrap().to_string());
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, set_cookie, json)
}

async fn admin_cookie(app: &Router) -> String {
    let (status, cookie, _) = send(app, "POST", "/admin/auth", None, Some(json!({ "password": ADMIN_PASSWORD }))).await;
    assert_eq!(status, StatusCode::OK);
    cookie.unwrap()
}

async fn user_cookie(app: &Router, email: &str) -> String {
    let (status, cookie, body) = send(
        app,
        "POST",
        "/auth/signup",
        None,
        Some(json!({ "email": email, "password": "correct horse" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    cookie.unwrap()
}

async fn create_character(app: &Router, admin: &str) -> String {
    let (status, _, body) = send(
        app,
        "POST",
        "/characters",
        Some(admin),
        Some(json!({
            "name": "Ada",
            "description": "Analyst",
            "image": "/uploads/ada.png",
            "basePrompt": "You are Ada.",
            "greetingText": "Good evening."
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    body["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn health_is_public() {
    let (app, _) = app(vec![]);
    let (status, _, body) = send(&app, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn signup_signin_and_me() {
    let (app, _) = app(vec![]);
    let cookie = user_cookie(&app, "  Ada@Example.com ").await;
    assert!(cookie.starts_with("user_session="));

    let (status, _, body) = send(&app, "GET", "/auth/me", Some(&cookie), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["email"], "ada@example.com");

    let (status, _, _) = send(
        &app,
        "POST",
        "/auth/signup",
        None,
        Some(json!({ "email": "ada@example.com", "password": "another pass" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _, body) = send(
        &app,
        "POST",
        "/auth/signin",
        None,
        Some(json!({ "email": "ada@example.com", "password": "wrong password" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Invalid credentials");

    let (status, cookie, _) = send(
        &app,
        "POST",
        "/auth/signin",
        None,
        Some(json!({ "email": "ADA@example.com", "password": "correct horse" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(cookie.unwrap().starts_with("user_session="));
}

#[tokio::test]
async fn logout_expires_cookie() {
    let (app, _) = app(vec![]);
    let (status, cookie, _) = send(&app, "POST", "/auth/logout", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cookie.unwrap(), "user_session=");
}

#[tokio::test]
async fn me_requires_session() {
    let (app, _) = app(vec![]);
    let (status, _, body) = send(&app, "GET", "/auth/me", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Not authenticated");
}

#[tokio::test]
async fn character_writes_need_admin() {
    let (app, _) = app(vec![]);
    let user = user_cookie(&app, "ada@example.com").await;

    let (status, _, _) = send(
        &app,
        "POST",
        "/characters",
        Some(&user),
        Some(json!({ "name": "x", "description": "y", "image": "z" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _, _) = send(&app, "POST", "/admin/auth", None, Some(json!({ "password": "nope" }))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _, body) = send(&app, "GET", "/admin/check", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["authenticated"], false);

    let admin = admin_cookie(&app).await;
    let (status, _, _) = send(&app, "GET", "/admin/check", Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn character_crud() {
    let (app, _) = app(vec![]);
    let admin = admin_cookie(&app).await;

    let (status, _, body) = send(
        &app,
        "POST",
        "/characters",
        Some(&admin),
        Some(json!({ "name": "Ada", "description": "Analyst" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Image is required");

    let id = create_character(&app, &admin).await;

    let (status, _, body) = send(&app, "GET", "/characters", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["basePrompt"], "You are Ada.");

    let (status, _, body) = send(
        &app,
        "PUT",
        &format!("/characters/{}", id),
        Some(&admin),
        Some(json!({ "name": "Ada L.", "description": "Countess", "image": "" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "Ada L.");
    assert_eq!(body["image"], "/uploads/ada.png");

    let (status, _, _) = send(&app, "DELETE", &format!("/characters/{}", id), Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _, body) = send(&app, "GET", &format!("/characters/{}", id), None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Character not found");

    let (status, _, _) = send(&app, "DELETE", &format!("/characters/{}", id), Some(&admin), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn conversation_roundtrip() {
    let (app, backend) = app(vec![Ok("Good evening to you.".into())]);
    let admin = admin_cookie(&app).await;
    let user = user_cookie(&app, "ada@example.com").await;
    let id = create_character(&app, &admin).await;
    let uri = format!("/conversation/{}", id);

    let (status, _, body) = send(&app, "POST", &uri, Some(&user), Some(json!({ "content": "Hello" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Good evening to you.");
    assert_eq!(
        backend.calls.lock().unwrap()[0],
        vec![
            HistoryEntry::user("You are Ada."),
            HistoryEntry::model("Good evening."),
            HistoryEntry::user("Hello"),
        ]
    );

    let (status, _, body) = send(&app, "GET", &uri, Some(&user), None).await;
    assert_eq!(status, StatusCode::OK);
    let turns = body.as_array().unwrap();
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[0]["role"], "user");
    assert_eq!(turns[0]["content"], "Hello");
    assert_eq!(turns[1]["role"], "model");

    // another user sees their own, empty conversation
    let other = user_cookie(&app, "grace@example.com").await;
    let (_, _, body) = send(&app, "GET", &uri, Some(&other), None).await;
    assert!(body.as_array().unwrap().is_empty());

    let (status, _, body) = send(&app, "DELETE", &uri, Some(&user), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deleted"], 2);

    let (_, _, body) = send(&app, "GET", &uri, Some(&user), None).await;
    assert!(body.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn conversation_errors() {
    let (app, backend) = app(vec![Err(BackendError::Request("HTTP 400: API key not valid".into()))]);
    let admin = admin_cookie(&app).await;
    let user = user_cookie(&app, "ada@example.com").await;
    let id = create_character(&app, &admin).await;
    let uri = format!("/conversation/{}", id);

    let (status, _, _) = send(&app, "POST", &uri, None, Some(json!({ "content": "Hello" }))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let missing = format!("/conversation/{}", uuid::Uuid::new_v4());
    let (status, _, body) = send(&app, "POST", &missing, Some(&user), Some(json!({ "content": "Hello" }))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Character not found");
    assert!(backend.calls.lock().unwrap().is_empty());

    let (status, _, _) = send(&app, "POST", &uri, Some(&user), Some(json!({ "content": "   " }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _, body) = send(&app, "POST", &uri, Some(&user), Some(json!({ "content": "Hello" }))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].as_str().unwrap().contains("API key not valid"));

    let (_, _, body) = send(&app, "GET", &uri, Some(&user), None).await;
    assert!(body.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn exhausted_rate_limit_is_a_server_error() {
    let (app, backend) = app(vec![
        Err(BackendError::RateLimited("quota".into())),
        Err(BackendError::RateLimited("quota".into())),
        Err(BackendError::RateLimited("quota".into())),
    ]);
    let admin = admin_cookie(&app).await;
    let user = user_cookie(&app, "ada@example.com").await;
    let id = create_character(&app, &admin).await;

    let (status, _, body) = send(
        &app,
        "POST",
        &format!("/conversation/{}", id),
        Some(&user),
        Some(json!({ "content": "Hello" })),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].as_str().unwrap().contains("after 3 attempts"));
    assert_eq!(backend.calls.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn malformed_character_ids_are_not_found() {
    let (app, backend) = app(vec![]);
    let admin = admin_cookie(&app).await;
    let user = user_cookie(&app, "ada@example.com").await;

    let (status, _, body) = send(
        &app,
        "POST",
        "/conversation/not-a-uuid",
        Some(&user),
        Some(json!({ "content": "hi" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Character not found");
    assert!(backend.calls.lock().unwrap().is_empty());

    let (status, _, body) = send(&app, "GET", "/characters/not-a-uuid", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Character not found");

    let (status, _, body) = send(&app, "DELETE", "/characters/not-a-uuid", Some(&admin), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Character not found");
}

#[tokio::test]
async fn session_cookies_carry_security_attributes() {
    let (app, _) = app(vec![]);
    let request = Request::builder()
        .method("POST")
        .uri("/auth/signup")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            json!({ "email": "ada@example.com", "password": "correct horse" }).to_string(),
        ))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let set_cookie = response.headers()[header::SET_COOKIE].to_str().unwrap().to_string();
    assert!(set_cookie.starts_with("user_session="));
    for attribute in ["HttpOnly", "SameSite=Strict", "Path=/", "Max-Age=2592000"] {
        assert!(set_cookie.contains(attribute), "{} missing from {}", attribute, set_cookie);
    }
    assert!(!set_cookie.contains("Secure"));

    let (status, cookie, body) = send(&app, "DELETE", "/admin/auth", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(cookie.unwrap(), "admin_auth=");
}
