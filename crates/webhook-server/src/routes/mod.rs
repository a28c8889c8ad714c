//! Route handlers for the webhook endpoints.

pub mod changes;
pub mod health;
pub mod lifecycle;

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use bridge_core::Activities;
use serde::Deserialize;
use subscription_monitor::{CHANGES_PATH, LIFECYCLE_PATH};

use crate::error::ServerError;
use crate::state::AppState;

/// Build the router with all routes.
pub fn router() -> Router<AppState> {
    Router::new()
        .route(CHANGES_PATH, post(changes::changes))
        .route(LIFECYCLE_PATH, post(lifecycle::lifecycle))
        .route("/health", get(health::health))
}

/// Query parameters Graph sends when validating a notification URL.
#[derive(Debug, Default, Deserialize)]
pub struct Validation {
    #[serde(rename = "validationToken")]
    pub validation_token: Option<String>,
}

impl Validation {
    /// The plain-text echo Graph expects, when this is a validation request.
    fn echo(&self) -> Option<Response> {
        let token = self.validation_token.as_deref().filter(|t| !t.is_empty())?;
        Some(
            (
                StatusCode::OK,
                [(header::CONTENT_TYPE, "text/plain")],
                token.to_string(),
            )
                .into_response(),
        )
    }
}

fn parse_activities(body: &[u8], what: &str) -> Result<Activities, ServerError> {
    serde_json::from_slice(body)
        .map_err(|_| ServerError::BadRequest(format!("unable to get the {what} from the message")))
}
