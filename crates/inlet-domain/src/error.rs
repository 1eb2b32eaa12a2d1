//! Error types for domain operations.

use thiserror::Error;

use crate::catalog::CatalogError;
use crate::engine::QueryError;
use inlet_store::StoreError;

/// Result type alias for domain operations.
pub type Result<T> = std::result::Result<T, DomainError>;

/// Errors that can occur during domain processing.
#[derive(Debug, Error)]
pub enum DomainError {
    /// A domain definition violated a structural invariant.
    #[error("invalid domain definition {domain}: {message}")]
    InvalidDefinition {
        /// The offending domain.
        domain: String,
        /// Description of the violation.
        message: String,
    },

    /// The domain dependency graph contains a cycle.
    #[error("cyclic domain dependency involving {node}")]
    CyclicDependency {
        /// A node on the cycle.
        node: String,
    },

    /// The registry payload could not be parsed.
    #[error("failed to parse domain registry: {message}")]
    ParseFailure {
        /// Description of the parse failure.
        message: String,
    },

    /// The named table is not part of the domain.
    #[error("domain {domain} has no table {table}")]
    UnknownTable {
        /// The domain searched.
        domain: String,
        /// The missing table.
        table: String,
    },

    /// An insert operation found the target already materialised.
    #[error("domain table already exists at {path}")]
    TargetExists {
        /// Path of the existing target.
        path: String,
    },

    /// The domain operation name is not recognised.
    #[error("unknown domain operation {name:?}; use insert, update or delete")]
    UnknownOperation {
        /// The rejected operation name.
        name: String,
    },

    /// One or more domains failed during a full refresh; the rest were
    /// still attempted.
    #[error("domain refresh failed: {}", failures.join("; "))]
    RefreshFailed {
        /// Per-domain failure descriptions.
        failures: Vec<String>,
    },

    /// The query engine failed to evaluate a transform.
    #[error(transparent)]
    Query(#[from] QueryError),

    /// A storage failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A catalogue failure.
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}
