//! Change notifications.

use activity_handler::{Admission, HandlerError};
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::{debug, warn};

use super::{parse_activities, Validation};
use crate::error::{Result, ServerError};
use crate::state::AppState;

/// Queue every notification in the delivery.
///
/// Shed and unknown-subscription notifications still count as delivered so
/// Graph does not retry them.
pub async fn changes(
    State(state): State<AppState>,
    Query(validation): Query<Validation>,
    body: Bytes,
) -> Result<Response> {
    if let Some(echo) = validation.echo() {
        return Ok(echo);
    }

    let activities = parse_activities(&body, "activities")?;
    let mut errors = Vec::new();
    for activity in activities.value {
        let subscription_id = activity.subscription_id.clone();
        match state.handler.handle(activity).await {
            Ok(Admission::Queued) => {}
            Ok(Admission::UnknownSubscription) => {
                debug!(
                    subscription_id = %subscription_id,
                    "Notification for an unknown subscription"
                );
            }
            Err(HandlerError::QueueFull) => {}
            Err(err) => {
                warn!(subscription_id = %subscription_id, error = %err, "Unable to process activity");
                errors.push(err);
            }
        }
    }

    match ServerError::from_handler_errors(&errors) {
        Some(err) => Err(err),
        None => Ok(StatusCode::ACCEPTED.into_response()),
    }
}
