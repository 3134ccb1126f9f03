use domain::DomainError;
use thiserror::Error;

/// Errors that can occur when interacting with a store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A write was refused because it would break a domain invariant.
    #[error("Invalid record: {0}")]
    Invalid(#[from] DomainError),

    /// A stored record violates a domain invariant.
    #[error("Corrupt record: {0}")]
    Corrupt(String),

    /// The store refused the operation (e.g. it is unreachable).
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
