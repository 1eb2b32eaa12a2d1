//! Per-table streaming supervision.
//!
//! One supervisor owns one streaming query for one source table: a
//! stable query name, a checkpoint prefix derived from it, the input
//! stream bound to the table's raw landing prefix, and the per-batch
//! processor. Exactly one supervisor instance may run per
//! `(job tag, source, table)` in a process.
//!
//! Stop is cooperative: the stop signal is observed between batches and
//! the in-flight batch settles before the task ends. Restarting against
//! the same checkpoint prefix resumes from the last committed offset.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::Instrument;

use inlet_core::observability::batch_span;
use inlet_core::paths::ensure_ends_with_slash;
use inlet_store::TableStore;

use crate::error::{IngestError, Result};
use crate::processor::CdcBatchProcessor;
use crate::source::EventSource;

/// Supervises the streaming query of one source table.
pub struct TableStreamingSupervisor<S: TableStore + ?Sized> {
    query_name: String,
    checkpoint_prefix: String,
    source: String,
    table: String,
    event_source: Arc<dyn EventSource>,
    processor: Arc<CdcBatchProcessor<S>>,
}

impl<S: TableStore + ?Sized + 'static> TableStreamingSupervisor<S> {
    /// Creates a supervisor.
    ///
    /// The query name is `"<job_tag> <source>.<table>"` and the
    /// checkpoint prefix `<checkpoint_root>/<job_tag>/<query_name>`.
    /// The checkpoint path is stable; moving it resets delivery.
    pub fn new(
        job_tag: &str,
        checkpoint_root: &str,
        event_source: Arc<dyn EventSource>,
        processor: Arc<CdcBatchProcessor<S>>,
    ) -> Self {
        let reference = processor.reference();
        let source = reference.source.clone();
        let table = reference.table.clone();
        let query_name = format!("{job_tag} {source}.{table}");
        let checkpoint_prefix = format!(
            "{}{job_tag}/{query_name}",
            ensure_ends_with_slash(checkpoint_root)
        );

        Self {
            query_name,
            checkpoint_prefix,
            source,
            table,
            event_source,
            processor,
        }
    }

    /// The query name of this supervisor.
    #[must_use]
    pub fn query_name(&self) -> &str {
        &self.query_name
    }

    /// The checkpoint prefix of this supervisor.
    #[must_use]
    pub fn checkpoint_prefix(&self) -> &str {
        &self.checkpoint_prefix
    }

    /// Opens the input stream and starts the per-batch loop.
    ///
    /// Start is idempotent with respect to delivery: the stream resumes
    /// from the last committed offset under the checkpoint prefix.
    ///
    /// # Errors
    ///
    /// Returns an error when the input stream cannot be opened.
    pub async fn start(self) -> Result<SupervisorHandle> {
        let run_id = ulid::Ulid::new().to_string();
        tracing::info!(
            query = %self.query_name,
            checkpoint = %self.checkpoint_prefix,
            run_id = %run_id,
            "initialising per batch processing"
        );

        let mut stream = self
            .event_source
            .open(&self.source, &self.table, &self.checkpoint_prefix)
            .await?;

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let query_name = self.query_name.clone();
        let processor = self.processor;

        let task: JoinHandle<Result<()>> = tokio::spawn(async move {
            loop {
                // Cancellation is cooperative and observed between
                // batches; a merge in flight cannot be interrupted.
                if *stop_rx.borrow_and_update() {
                    tracing::info!(query = %query_name, "stop requested; query shutting down");
                    return Ok(());
                }

                let batch = tokio::select! {
                    next = stream.next_batch() => next?,
                    changed = stop_rx.changed() => {
                        if changed.is_err() {
                            // Handle dropped; treat as a stop request.
                            tracing::info!(query = %query_name, "stop channel closed; query shutting down");
                            return Ok(());
                        }
                        continue;
                    }
                };

                let Some(batch) = batch else {
                    tracing::info!(query = %query_name, "input stream ended");
                    return Ok(());
                };

                let span = batch_span(&query_name, batch.id);
                let result: Result<()> = async {
                    tracing::debug!(rows = batch.len(), "processing micro-batch");
                    processor.process_batch(&batch).await?;
                    stream.commit(batch.id).await?;
                    Ok(())
                }
                .instrument(span)
                .await;

                if let Err(e) = result {
                    tracing::error!(query = %query_name, error = %e, "streaming query failed");
                    return Err(e);
                }
            }
        });

        tracing::info!(query = %self.query_name, "started query");
        Ok(SupervisorHandle {
            query_name: self.query_name,
            stop_tx,
            task,
        })
    }
}

/// Handle to a running streaming query.
pub struct SupervisorHandle {
    query_name: String,
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<Result<()>>,
}

impl SupervisorHandle {
    /// The query name of the supervised query.
    #[must_use]
    pub fn query_name(&self) -> &str {
        &self.query_name
    }

    /// Requests the query to stop and waits for the in-flight batch to
    /// settle.
    ///
    /// # Errors
    ///
    /// Returns the query's terminal error, if it failed.
    pub async fn stop(self) -> Result<()> {
        let _ = self.stop_tx.send(true);
        self.join().await
    }

    /// Waits for the query to end on its own (stream end or failure).
    ///
    /// # Errors
    ///
    /// Returns the query's terminal error, if it failed.
    pub async fn join(self) -> Result<()> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(IngestError::Store(inlet_store::StoreError::Storage {
                message: format!("streaming task panicked: {e}"),
            })),
        }
    }
}
