//! Errors shared by every [`crate::Store`] implementation.

use thiserror::Error;

/// Errors from repository operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The addressed row does not exist (or is soft-deleted where that matters).
    #[error("not found")]
    NotFound,

    /// A uniqueness or scheduling constraint rejected the write.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The backing database failed.
    #[error("storage backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => Self::NotFound,
            sqlx::Error::Database(db) if db.is_unique_violation() => Self::Conflict(db.message().to_string()),
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => Self::NotFound,
            _ => Self::Backend(err.to_string()),
        }
    }
}
