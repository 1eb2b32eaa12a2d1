//! Per-batch CDC processing.
//!
//! The supervisor installs a [`CdcBatchProcessor`] as its per-batch
//! handler: structured-zone CDC merge first, then every registered
//! [`CdcSliceHandler`] (domain refresh) over the rows that actually
//! merged. Handlers absorb their own data failures; only infrastructure
//! errors propagate and stop the query.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use inlet_core::event::MicroBatch;
use inlet_core::schema::SourceReference;
use inlet_store::{Row, TableStore};

use crate::error::Result;
use crate::metrics::{BATCHES_PROCESSED, BATCH_DURATION};
use crate::zone::StructuredZoneCdc;

/// Downstream consumer of the CDC slice a batch merged for one table.
///
/// The domain-refresh engine implements this; further consumers
/// (secondary indexes, notifications) plug in the same way.
#[async_trait]
pub trait CdcSliceHandler: Send + Sync {
    /// Handles the merged CDC rows of `source.table` for one batch.
    ///
    /// Implementations must absorb data failures and only return an
    /// error for infrastructure problems.
    async fn handle_slice(&self, source: &str, table: &str, rows: &[Row]) -> Result<()>;
}

/// Processes one micro-batch for one source table.
pub struct CdcBatchProcessor<S: TableStore + ?Sized> {
    reference: SourceReference,
    structured: Arc<StructuredZoneCdc<S>>,
    handlers: Vec<Arc<dyn CdcSliceHandler>>,
}

impl<S: TableStore + ?Sized> CdcBatchProcessor<S> {
    /// Creates a processor for one source table.
    pub fn new(reference: SourceReference, structured: Arc<StructuredZoneCdc<S>>) -> Self {
        Self {
            reference,
            structured,
            handlers: Vec::new(),
        }
    }

    /// Registers a downstream slice handler.
    #[must_use]
    pub fn with_handler(mut self, handler: Arc<dyn CdcSliceHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    /// The source reference this processor serves.
    #[must_use]
    pub fn reference(&self) -> &SourceReference {
        &self.reference
    }

    /// Processes one micro-batch.
    ///
    /// # Errors
    ///
    /// Propagates infrastructure failures only; per-batch data errors
    /// are diverted or logged inside the zones.
    pub async fn process_batch(&self, batch: &MicroBatch) -> Result<()> {
        let started = Instant::now();
        let records: Vec<&inlet_core::event::RawRecord> = batch.records.iter().collect();

        let merged = self.structured.process(&self.reference, &records).await?;

        if !merged.is_empty() {
            for handler in &self.handlers {
                handler
                    .handle_slice(&self.reference.source, &self.reference.table, &merged)
                    .await?;
            }
        }

        metrics::counter!(BATCHES_PROCESSED).increment(1);
        metrics::histogram!(BATCH_DURATION).record(started.elapsed().as_secs_f64());
        Ok(())
    }
}
