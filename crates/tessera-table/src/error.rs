//! Error types for table storage operations.

/// Error returned by a [`TableClient`](crate::TableClient).
///
/// Errors are `Clone` so a caller can capture one and hand the same value to
/// several waiters.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    /// The named table does not exist.
    #[error("Table not found: {0}")]
    ResourceNotFound(String),

    /// The table already exists or is being modified.
    #[error("Table in use: {0}")]
    ResourceInUse(String),

    /// The request was malformed or exceeded a service limit.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Credentials were rejected.
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// The service asked the caller to slow down.
    #[error("Request throttled: {0}")]
    Throttled(String),

    /// Connection or protocol failure.
    #[error("Transport error: {0}")]
    Transport(String),
}

impl StorageError {
    /// Whether this error signals a missing table.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::ResourceNotFound(_))
    }
}

/// Result type for table storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
