use domain::UnknownValue;
use thiserror::Error;

/// Errors that can occur when interacting with the store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A uniqueness rule rejected the write (e.g. a duplicate order number).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A row referenced by the write does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A persisted value could not be mapped back into the domain.
    #[error("Corrupt row: {0}")]
    Corrupt(String),

    /// A persisted enum column held an unknown value.
    #[error(transparent)]
    Decode(#[from] UnknownValue),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
