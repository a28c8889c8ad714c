//! Lifecycle notifications.

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::debug;

use super::{parse_activities, Validation};
use crate::error::{Result, ServerError};
use crate::state::AppState;

/// Handle every lifecycle event in the delivery inline.
pub async fn lifecycle(
    State(state): State<AppState>,
    Query(validation): Query<Validation>,
    body: Bytes,
) -> Result<Response> {
    if let Some(echo) = validation.echo() {
        return Ok(echo);
    }

    let events = parse_activities(&body, "lifecycle events")?;
    let mut errors = Vec::new();
    for event in events.value {
        match state.handler.handle_lifecycle_event(&event).await {
            Ok(reason) => debug!(
                subscription_id = %event.subscription_id,
                reason = reason.as_str(),
                "Lifecycle event handled"
            ),
            Err(err) => errors.push(err),
        }
    }

    match ServerError::rejected(&errors) {
        Some(err) => Err(err),
        None => Ok(StatusCode::OK.into_response()),
    }
}
