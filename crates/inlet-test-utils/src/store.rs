//! Fault injection for the table store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use inlet_core::schema::PrimaryKey;
use inlet_store::{MergeClauses, MergeOutcome, Result, Row, StoreError, TableStore};

/// Wraps a table store and fails merges with the distinguished
/// concurrent-modification error a configured number of times per path.
///
/// Lets tests reproduce contention deterministically: the in-memory
/// store serialises commits, so real conflicts never occur there.
pub struct ConflictInjectingStore<S: TableStore + ?Sized> {
    inner: Arc<S>,
    conflicts: Mutex<HashMap<String, u32>>,
}

impl<S: TableStore + ?Sized> ConflictInjectingStore<S> {
    /// Wraps `inner` with no conflicts configured.
    pub fn new(inner: Arc<S>) -> Self {
        Self {
            inner,
            conflicts: Mutex::new(HashMap::new()),
        }
    }

    /// Makes the next `count` merges against `path` fail with a
    /// concurrent-modification conflict.
    pub fn fail_merges(&self, path: &str, count: u32) {
        self.conflicts
            .lock()
            .expect("conflict lock")
            .insert(path.to_string(), count);
    }

    fn take_conflict(&self, path: &str) -> bool {
        let mut conflicts = self.conflicts.lock().expect("conflict lock");
        match conflicts.get_mut(path) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl<S: TableStore + ?Sized> TableStore for ConflictInjectingStore<S> {
    async fn exists(&self, path: &str) -> Result<bool> {
        self.inner.exists(path).await
    }

    async fn has_rows(&self, path: &str) -> Result<bool> {
        self.inner.has_rows(path).await
    }

    async fn read_rows(&self, path: &str) -> Result<Vec<Row>> {
        self.inner.read_rows(path).await
    }

    async fn append(&self, path: &str, rows: &[Row]) -> Result<()> {
        self.inner.append(path, rows).await
    }

    async fn overwrite(&self, path: &str, rows: &[Row], replace_schema: bool) -> Result<()> {
        self.inner.overwrite(path, rows, replace_schema).await
    }

    async fn merge(
        &self,
        path: &str,
        rows: &[Row],
        key: &PrimaryKey,
        clauses: &MergeClauses,
    ) -> Result<MergeOutcome> {
        if self.take_conflict(path) {
            return Err(StoreError::ConcurrentModification {
                path: path.to_string(),
            });
        }
        self.inner.merge(path, rows, key, clauses).await
    }

    async fn delete_table(&self, path: &str) -> Result<()> {
        self.inner.delete_table(path).await
    }

    async fn vacuum(&self, path: &str) -> Result<()> {
        self.inner.vacuum(path).await
    }

    async fn compact(&self, path: &str) -> Result<()> {
        self.inner.compact(path).await
    }

    async fn refresh_manifest(&self, path: &str) -> Result<()> {
        self.inner.refresh_manifest(path).await
    }

    async fn list_tables(&self, root: &str, depth_limit: u32) -> Result<Vec<String>> {
        self.inner.list_tables(root, depth_limit).await
    }
}
