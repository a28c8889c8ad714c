//! Application state shared across handlers.

use std::sync::Arc;

use activity_handler::ActivityHandler;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Validates and queues incoming notifications.
    pub handler: Arc<ActivityHandler>,
}

impl AppState {
    pub fn new(handler: Arc<ActivityHandler>) -> Self {
        Self { handler }
    }
}
