//! Error types for table storage operations.

use thiserror::Error;

/// Result type alias for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur during table storage operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A conflicting commit landed since this transaction started.
    ///
    /// Distinguished so callers can retry under policy.
    #[error("concurrent modification on {path}")]
    ConcurrentModification {
        /// Path of the contended table.
        path: String,
    },

    /// The table does not exist.
    #[error("table not found: {path}")]
    NotFound {
        /// Path that was looked up.
        path: String,
    },

    /// Incoming rows carry columns the target table does not have.
    ///
    /// Not retryable; operator-actionable.
    #[error("schema drift on {path}: columns {columns:?} missing from target")]
    SchemaDrift {
        /// Path of the target table.
        path: String,
        /// The columns absent from the target.
        columns: Vec<String>,
    },

    /// A row is missing one of the primary-key columns.
    #[error("row is missing primary key column {column}")]
    MissingKeyColumn {
        /// The absent key column.
        column: String,
    },

    /// A malformed table path.
    #[error("invalid table path: {path}")]
    InvalidPath {
        /// The offending path.
        path: String,
    },

    /// An infrastructure failure in the underlying storage.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the failure.
        message: String,
    },
}

impl StoreError {
    /// Creates a storage infrastructure error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Returns true for the distinguished concurrent-modification
    /// error, the only kind the retry harness consumes.
    #[must_use]
    pub fn is_concurrent_modification(&self) -> bool {
        matches!(self, Self::ConcurrentModification { .. })
    }
}
