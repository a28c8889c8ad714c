//! Error types for the webhook endpoints.

use activity_handler::HandlerError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

/// Errors returned to Graph from the notification endpoints.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The body was not a notification envelope.
    #[error("{0}")]
    BadRequest(String),

    /// Every rejected notification carried the wrong client state.
    #[error("{0}")]
    Unauthorized(String),

    /// One or more notifications were rejected; messages are newline-joined.
    #[error("{0}")]
    Rejected(String),

    /// The handler is not accepting notifications.
    #[error("activity handler is stopped")]
    Unavailable,
}

impl ServerError {
    /// Fold the per-notification handler errors of one delivery.
    pub fn from_handler_errors(errors: &[HandlerError]) -> Option<Self> {
        if errors.is_empty() {
            return None;
        }
        if errors.iter().any(|err| matches!(err, HandlerError::Stopped)) {
            return Some(ServerError::Unavailable);
        }
        let message = join_messages(errors);
        if errors
            .iter()
            .all(|err| matches!(err, HandlerError::InvalidClientState(_)))
        {
            return Some(ServerError::Unauthorized(message));
        }
        Some(ServerError::Rejected(message))
    }

    /// Lifecycle deliveries answer every failure with a plain rejection.
    pub fn rejected(errors: &[HandlerError]) -> Option<Self> {
        if errors.is_empty() {
            return None;
        }
        Some(ServerError::Rejected(join_messages(errors)))
    }
}

fn join_messages(errors: &[HandlerError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = match &self {
            ServerError::BadRequest(msg) => {
                tracing::debug!("Bad request: {}", msg);
                StatusCode::BAD_REQUEST
            }
            ServerError::Unauthorized(msg) => {
                tracing::warn!("Unauthorized notifications: {}", msg);
                StatusCode::UNAUTHORIZED
            }
            ServerError::Rejected(msg) => {
                tracing::warn!("Rejected notifications: {}", msg);
                StatusCode::BAD_REQUEST
            }
            ServerError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        };

        let body = serde_json::json!({
            "error": self.to_string()
        });

        (status, Json(body)).into_response()
    }
}

/// Result type for route handlers.
pub type Result<T> = std::result::Result<T, ServerError>;
