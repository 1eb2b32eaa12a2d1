//! # inlet-core
//!
//! Core abstractions for the inlet CDC ingestion pipeline.
//!
//! This crate provides the foundational types shared across all inlet
//! components:
//!
//! - **Configuration**: Typed access to the flat job-parameter bag
//! - **Retry**: Bounded exponential backoff with jitter for
//!   concurrent-modification conflicts
//! - **Events**: The CDC operation codes and micro-batch row model
//! - **Schemas**: Source references, column definitions, and the schema
//!   registry interface
//! - **Paths**: Table identifiers and zone path derivation
//! - **Observability**: Span constructors for the pipeline stages
//!
//! ## Crate Boundary
//!
//! `inlet-core` is the only crate allowed to define shared primitives.
//! The storage, ingestion, and domain crates build on the contracts
//! defined here.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod event;
pub mod observability;
pub mod paths;
pub mod retry;
pub mod schema;

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust
/// use inlet_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::{ConfigError, JobConfig};
    pub use crate::event::{EventMetadata, MicroBatch, Operation, RawRecord};
    pub use crate::paths::{ensure_ends_with_slash, raw_table_path, table_path, TableIdentifier};
    pub use crate::retry::{RetryError, RetryHarness, RetryPolicy};
    pub use crate::schema::{
        ColumnDef, InMemorySchemaRegistry, LogicalType, PrimaryKey, SchemaRegistry,
        SourceReference, TableSchema,
    };
}

// Re-export key types at crate root for ergonomics
pub use config::{ConfigError, JobConfig};
pub use event::{EventMetadata, MicroBatch, Operation, RawRecord};
pub use observability::{batch_span, zone_span};
pub use paths::TableIdentifier;
pub use retry::{RetryError, RetryHarness, RetryPolicy};
pub use schema::{
    ColumnDef, InMemorySchemaRegistry, LogicalType, PrimaryKey, SchemaRegistry, SourceReference,
    TableSchema,
};
