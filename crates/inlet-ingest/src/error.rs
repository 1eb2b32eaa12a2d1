//! Error types for the ingestion pipeline.
//!
//! Only infrastructure failures surface here. Data-shaped failures
//! (validation, schema-not-found, exhausted merge retries) are diverted
//! to the violations zone inside the pipeline and never stop a
//! streaming query.

use thiserror::Error;

use crate::source::SourceError;
use inlet_store::StoreError;

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, IngestError>;

/// Infrastructure errors fatal to the current streaming query.
#[derive(Debug, Error)]
pub enum IngestError {
    /// The table store failed for a non-data reason.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The event source failed.
    #[error(transparent)]
    Source(#[from] SourceError),
}
