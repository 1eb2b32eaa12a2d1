//! The event-source seam.
//!
//! An [`EventSource`] binds a source table's raw landing prefix to a
//! lazy, restartable sequence of micro-batches. Opening a stream
//! against the same checkpoint prefix resumes from the last committed
//! offset; moving the prefix resets delivery. The production binding is
//! the event-bus client; tests use the in-memory source from the test
//! utilities.

use async_trait::async_trait;

use inlet_core::event::MicroBatch;

/// Errors raised by an event source. Always infrastructure; a failing
/// source stops the streaming query.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// The stream could not be opened.
    #[error("failed to open event stream for {source_system}.{table}: {message}")]
    OpenFailed {
        /// Source system.
        source_system: String,
        /// Table name.
        table: String,
        /// Description of the failure.
        message: String,
    },

    /// Reading or committing failed.
    #[error("event source failure: {message}")]
    Failure {
        /// Description of the failure.
        message: String,
    },
}

/// Produces restartable per-table micro-batch sequences.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Opens the micro-batch stream for one source table, resuming from
    /// the offset committed under `checkpoint_prefix`.
    async fn open(
        &self,
        source: &str,
        table: &str,
        checkpoint_prefix: &str,
    ) -> Result<Box<dyn BatchStream>, SourceError>;
}

/// One open micro-batch stream.
#[async_trait]
pub trait BatchStream: Send {
    /// Returns the next micro-batch, or `None` when the stream has
    /// ended (finite test streams; production streams never end).
    async fn next_batch(&mut self) -> Result<Option<MicroBatch>, SourceError>;

    /// Commits a fully-processed batch id to the checkpoint. Batches
    /// up to and including this id are not re-delivered on restart.
    async fn commit(&mut self, batch_id: i64) -> Result<(), SourceError>;
}
