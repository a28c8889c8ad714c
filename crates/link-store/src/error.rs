//! Store error types.

use thiserror::Error;

use crate::crypt::CryptError;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// SQLx error (connection, query, etc.)
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Migration error
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Record not found
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Record already exists
    #[error("{entity} already exists: {id}")]
    AlreadyExists { entity: &'static str, id: String },

    /// Token sealing or opening failed
    #[error(transparent)]
    Crypt(#[from] CryptError),

    /// Token (de)serialization failed
    #[error("token serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Invalid argument
    #[error("invalid {field}: {message}")]
    Invalid { field: &'static str, message: String },
}

impl StoreError {
    /// Whether this is a "not found" error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
            || matches!(self, StoreError::Sqlx(sqlx::Error::RowNotFound))
    }

    pub(crate) fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        StoreError::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Map a unique violation to `AlreadyExists`, everything else to `Sqlx`.
    pub(crate) fn from_insert(err: sqlx::Error, entity: &'static str, id: &str) -> Self {
        if let sqlx::Error::Database(ref db_err) = err {
            if db_err.is_unique_violation() {
                return StoreError::AlreadyExists {
                    entity,
                    id: id.to_string(),
                };
            }
        }
        StoreError::Sqlx(err)
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Turns a `NotFound` error into `Ok(None)`.
pub trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for Result<T> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}
