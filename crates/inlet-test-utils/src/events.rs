//! Scripted in-memory event source with checkpoint-resume semantics.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use inlet_core::event::MicroBatch;
use inlet_ingest::{BatchStream, EventSource, SourceError};

type TableKey = (String, String);

/// Event source fed from scripted batches.
///
/// Opening a stream snapshots the batches for the table whose ids are
/// greater than the offset committed under the checkpoint prefix, so a
/// restarted supervisor resumes where it left off.
#[derive(Default)]
pub struct MemoryEventSource {
    batches: Mutex<HashMap<TableKey, Vec<MicroBatch>>>,
    committed: Arc<Mutex<HashMap<String, i64>>>,
    /// When set, exhausted streams stay open (pending) instead of
    /// ending, mimicking a production stream awaiting its next tick.
    hold_open: bool,
}

impl MemoryEventSource {
    /// Creates a source whose streams end once the script runs out.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a source whose streams stay pending once exhausted,
    /// for exercising cooperative stop.
    #[must_use]
    pub fn new_hold_open() -> Self {
        Self {
            hold_open: true,
            ..Self::default()
        }
    }

    /// Scripts a batch for one table.
    pub fn push_batch(&self, source: &str, table: &str, batch: MicroBatch) {
        self.batches
            .lock()
            .expect("source lock")
            .entry((source.to_string(), table.to_string()))
            .or_default()
            .push(batch);
    }

    /// The offset committed under a checkpoint prefix, if any.
    #[must_use]
    pub fn committed_offset(&self, checkpoint_prefix: &str) -> Option<i64> {
        self.committed
            .lock()
            .expect("commit lock")
            .get(checkpoint_prefix)
            .copied()
    }
}

#[async_trait]
impl EventSource for MemoryEventSource {
    async fn open(
        &self,
        source: &str,
        table: &str,
        checkpoint_prefix: &str,
    ) -> Result<Box<dyn BatchStream>, SourceError> {
        let after = self
            .committed_offset(checkpoint_prefix)
            .unwrap_or(i64::MIN);

        let mut remaining: Vec<MicroBatch> = self
            .batches
            .lock()
            .expect("source lock")
            .get(&(source.to_string(), table.to_string()))
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter(|b| b.id > after)
            .collect();
        remaining.sort_by_key(|b| b.id);

        Ok(Box::new(MemoryBatchStream {
            remaining: remaining.into(),
            committed: Arc::clone(&self.committed),
            checkpoint_prefix: checkpoint_prefix.to_string(),
            hold_open: self.hold_open,
        }))
    }
}

struct MemoryBatchStream {
    remaining: VecDeque<MicroBatch>,
    committed: Arc<Mutex<HashMap<String, i64>>>,
    checkpoint_prefix: String,
    hold_open: bool,
}

#[async_trait]
impl BatchStream for MemoryBatchStream {
    async fn next_batch(&mut self) -> Result<Option<MicroBatch>, SourceError> {
        match self.remaining.pop_front() {
            Some(batch) => Ok(Some(batch)),
            None if self.hold_open => {
                std::future::pending::<()>().await;
                unreachable!("pending future resolved")
            }
            None => Ok(None),
        }
    }

    async fn commit(&mut self, batch_id: i64) -> Result<(), SourceError> {
        let mut committed = self.committed.lock().map_err(|_| SourceError::Failure {
            message: "commit lock poisoned".to_string(),
        })?;
        let entry = committed.entry(self.checkpoint_prefix.clone()).or_insert(i64::MIN);
        if batch_id > *entry {
            *entry = batch_id;
        }
        Ok(())
    }
}
