//! Error types for the external capabilities.

use thiserror::Error;

/// Errors returned by a [`GraphClient`](crate::GraphClient).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GraphError {
    /// The requested resource does not exist (or is not visible to the caller).
    #[error("graph resource not found: {0}")]
    NotFound(String),

    /// The bearer token was rejected.
    #[error("graph request unauthorized: {0}")]
    Unauthorized(String),

    /// Graph asked us to back off (HTTP 429).
    #[error("graph request throttled")]
    Throttled,

    /// Network failure, timeout or a 5xx response.
    #[error("transient graph failure: {0}")]
    Transient(String),

    /// Any other API-level error.
    #[error("graph api error {code}: {message}")]
    Api { code: String, message: String },

    /// The response body could not be decoded.
    #[error("unable to decode graph response: {0}")]
    Decode(String),
}

impl GraphError {
    /// True for the errors after which a later retry may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, GraphError::Throttled | GraphError::Transient(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, GraphError::NotFound(_))
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, GraphError::Unauthorized(_))
    }
}

/// Errors returned by the host platform SDK.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlatformError {
    /// A post, user, channel or file was not found.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A user with the requested username already exists.
    #[error("username already exists: {0}")]
    UsernameExists(String),

    /// The platform could not serve the request right now.
    #[error("platform unavailable: {0}")]
    Unavailable(String),

    /// Any other application error, carrying the platform's error id.
    #[error("platform error {id}: {message}")]
    Api { id: String, message: String },
}

impl PlatformError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, PlatformError::NotFound { .. })
    }
}
