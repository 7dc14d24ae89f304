use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use persona_relay::RelayError;
use persona_types::api::ErrorResponse;
use tracing::error;

/// Error returned by every handler, rendered as `{"error": "..."}`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    /// Logs `err` and hides it behind a generic message.
    pub fn internal(context: &str, err: impl std::fmt::Display) -> Self {
        error!("{}: {}", context, err);
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, context)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorResponse { error: self.message })).into_response()
    }
}

impl From<RelayError> for ApiError {
    fn from(e: RelayError) -> Self {
        match e {
            RelayError::NotFound(_) => ApiError::not_found(e.to_string()),
            // Backend failures are surfaced verbatim to the caller.
            RelayError::BackendExhausted { .. } | RelayError::Backend(_) => {
                error!("Relay failed: {}", e);
                ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
            RelayError::Store(e) => ApiError::internal("Failed to process message", e),
        }
    }
}

/// Runs blocking database work off the async runtime.
pub async fn blocking<F, T>(context: &'static str, f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::internal("spawn_blocking join error", e))?
        .map_err(|e| ApiError::internal(context, e))
}
