//! HTTP front of the Teams bridge.
//!
//! Graph posts change notifications to `/changes` and subscription lifecycle
//! events to `/lifecycle`; both answer URL validation requests by echoing the
//! `validationToken` query parameter. Notifications are handed to the
//! [`ActivityHandler`](activity_handler::ActivityHandler) held in [`AppState`].

pub mod config;
pub mod error;
pub mod routes;
pub mod state;

pub use config::{Config, ConfigError};
pub use error::ServerError;
pub use routes::router;
pub use state::AppState;
