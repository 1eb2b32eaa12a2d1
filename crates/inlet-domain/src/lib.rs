//! Domain table derivation for the inlet pipeline.
//!
//! Domain tables are derived from source tables by declarative SQL
//! transforms, evaluated by an opaque [`engine::QueryEngine`]. The
//! [`engine::DomainRefreshEngine`] keeps domain tables current in two
//! ways: incrementally from the CDC slice of each micro-batch, and by
//! full refresh under the domain job's insert/update/delete operations.
//! Derived tables are registered with the external catalogue so query
//! engines can find them.

#![forbid(unsafe_code)]

pub mod catalog;
pub mod definition;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod query;

pub use catalog::{CatalogColumn, CatalogError, CatalogTableSpec, DomainCatalog};
pub use definition::{
    DomainDefinition, DomainRegistry, PlannedTable, RefreshPlan, TableDefinition,
    TransformDefinition,
};
pub use engine::{
    CatalogBinding, DomainOperation, DomainRefreshEngine, DomainWarning, QueryEngine, QueryError,
    QueryInput,
};
pub use error::{DomainError, Result};
pub use query::ProjectionQueryEngine;
