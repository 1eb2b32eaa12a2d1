//! CDC ingestion for the inlet pipeline.
//!
//! One micro-batch flows through this crate as: decode → raw archive →
//! schema validation → merge into the structured zone, with
//! non-conforming rows diverted to the violations zone. The
//! [`supervisor::TableStreamingSupervisor`] owns one streaming query
//! per source table and survives per-batch data failures; only
//! infrastructure failures stop a query.

#![forbid(unsafe_code)]

pub mod error;
pub mod merge;
pub mod metrics;
pub mod processor;
pub mod source;
pub mod supervisor;
pub mod validator;
pub mod violations;
pub mod zone;

pub use error::{IngestError, Result};
pub use merge::{MergeEngine, MergeError};
pub use processor::{CdcBatchProcessor, CdcSliceHandler};
pub use source::{BatchStream, EventSource, SourceError};
pub use supervisor::{SupervisorHandle, TableStreamingSupervisor};
pub use validator::{validate_record, ValidatedRecord};
pub use violations::{ViolationRouter, ViolationZone};
pub use zone::{RawZone, StructuredZoneCdc, StructuredZoneLoad, ZonePipeline};
