//! Error types for the activity handler.

use bridge_core::{GraphError, PlatformError};
use link_store::StoreError;
use thiserror::Error;

/// Errors surfaced by the handler's public operations.
///
/// Worker paths never return these out of the pool; each processed activity
/// ends in a [`DiscardReason`](bridge_core::DiscardReason) instead.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The queue is at capacity and the activity was shed.
    #[error("activity queue is full")]
    QueueFull,

    /// The handler has not been started or is shutting down.
    #[error("activity handler is stopped")]
    Stopped,

    /// The handler was started twice.
    #[error("activity handler is already running")]
    AlreadyRunning,

    /// The notification's client state did not match the subscription secret.
    #[error("invalid client state for subscription {0}")]
    InvalidClientState(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("platform error: {0}")]
    Platform(#[from] PlatformError),

    /// Inline resource data could not be verified or opened.
    #[error("unable to decrypt notification content: {0}")]
    Decrypt(String),
}

/// Result type for handler operations.
pub type Result<T> = std::result::Result<T, HandlerError>;
