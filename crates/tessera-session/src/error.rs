//! Error types for session store operations.

use std::sync::Arc;

use tessera_table::{StorageError, TableStatus};

/// Failure to bring the backing table into a usable state.
///
/// Captured once by the readiness gate and replayed to every operation
/// afterwards, hence `Clone`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProvisionError {
    /// Table metadata could not be read.
    #[error("Failed to describe table {table}: {source}")]
    Describe {
        table: String,
        #[source]
        source: StorageError,
    },

    /// The create request was rejected.
    #[error("Failed to create table {table}: {source}")]
    Create {
        table: String,
        #[source]
        source: StorageError,
    },

    /// Native TTL could not be enabled on a freshly created table.
    #[error("Failed to enable TTL on table {table}: {source}")]
    EnableTtl {
        table: String,
        #[source]
        source: StorageError,
    },

    /// The table reached a status it can never leave for `Active`.
    #[error("Table {table} is in unusable status {status}")]
    BadStatus { table: String, status: TableStatus },

    /// The existing table is keyed on a different attribute.
    #[error("Table {table} is keyed on {found}, expected {expected}")]
    SchemaMismatch {
        table: String,
        expected: String,
        found: String,
    },

    /// The table did not become active in time.
    #[error("Table {table} not active after {waited_ms}ms")]
    Timeout { table: String, waited_ms: u64 },

    /// Provisioning stopped before reporting an outcome.
    #[error("Provisioning aborted: {0}")]
    Aborted(String),
}

/// Invalid store configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A field holds a value the store cannot use.
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// The TOML source could not be parsed.
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Error type for session store operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Provisioning failed; the store is unusable and must be rebuilt.
    #[error("Session store unavailable: {0}")]
    Fatal(Arc<ProvisionError>),

    /// Session does not exist.
    #[error("Session not found: {0}")]
    NotFound(String),

    /// A stored record could not be turned back into a session.
    #[error("Corrupt session record {id}: {reason}")]
    CorruptRecord { id: String, reason: String },

    /// A session could not be serialized.
    #[error("Failed to encode session {id}: {reason}")]
    Encode { id: String, reason: String },

    /// Error from the table storage client.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Some expired sessions could not be deleted.
    #[error("Reap incomplete: {deleted} deleted, {} failed", .failed_keys.len())]
    PartialReap {
        deleted: usize,
        failed_keys: Vec<String>,
    },

    /// Configuration rejected at construction.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl Error {
    /// Whether this error means the store can never serve requests.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Fatal(_))
    }
}

/// Result type for session store operations.
pub type Result<T> = std::result::Result<T, Error>;
