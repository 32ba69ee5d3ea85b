use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;
use thiserror::Error;

/// Internal error taxonomy shared by the gateway services.
///
/// This is the rich cause used for logging and for the authenticated confirm
/// flow. Public route handlers collapse every variant into the same opaque
/// not-found response; see [`AppError::opaque`].
///
/// There is deliberately no signing variant: HMAC-SHA256 accepts any key
/// length, so presigning cannot fail at runtime with valid static credentials.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("object not found")]
    NotFound,
    #[error("upstream responded with status {0}")]
    UpstreamStatus(u16),
    #[error("upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

pub type GatewayResult<T> = Result<T, GatewayError>;

/// A lightweight wrapper for boundary errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    /// The uniform response for public and unauthenticated surfaces.
    ///
    /// Every failure on those routes — unknown id, wrong status, invalid
    /// range, upstream error, missing credentials — maps here so that callers
    /// cannot distinguish "exists but forbidden" from "does not exist".
    pub fn opaque() -> Self {
        Self::not_found("not found")
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}
