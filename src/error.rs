use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Unified error type for the streamkeeper service.
#[derive(Debug, thiserror::Error)]
pub enum BotError {
    // ── Token Lifecycle ─────────────────────────────────────────────────
    #[error("Token invalid: {0}")]
    TokenInvalid(String),

    #[error("Token refresh rejected: {0}")]
    RefreshRejected(String),

    #[error("Code exchange failed: {0}")]
    ExchangeFailed(String),

    #[error("Identity provider unreachable: {0}")]
    TransportUnavailable(String),

    // ── Resource Errors ─────────────────────────────────────────────────
    #[error("User {0} not found")]
    UserNotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    // ── Dashboard Auth ──────────────────────────────────────────────────
    #[error("Login required")]
    Unauthorized,

    #[error("Invalid state parameter")]
    InvalidState,

    // ── Internal ────────────────────────────────────────────────────────
    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for BotError {
    fn from(e: sqlx::Error) -> Self {
        tracing::error!("Database error: {e}");
        BotError::Database(e.to_string())
    }
}

impl IntoResponse for BotError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            BotError::TokenInvalid(_) => (StatusCode::UNAUTHORIZED, "token_invalid"),
            BotError::RefreshRejected(_) => (StatusCode::BAD_GATEWAY, "refresh_rejected"),
            BotError::ExchangeFailed(_) => (StatusCode::BAD_GATEWAY, "exchange_failed"),
            BotError::TransportUnavailable(_) => {
                (StatusCode::BAD_GATEWAY, "transport_unavailable")
            }
            BotError::UserNotFound(_) => (StatusCode::NOT_FOUND, "user_not_found"),
            BotError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            BotError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized"),
            BotError::InvalidState => (StatusCode::BAD_REQUEST, "invalid_state"),
            BotError::Crypto(_) => (StatusCode::INTERNAL_SERVER_ERROR, "crypto_error"),
            BotError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "database_error"),
            BotError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };

        let body = json!({
            "error": {
                "code": code,
                "message": self.to_string(),
            }
        });

        (status, axum::Json(body)).into_response()
    }
}
