//! Table maintenance: compaction and vacuum over a root prefix.
//!
//! Operators want to see "10 tables vacuumed, 2 failed with reason X"
//! rather than a single-table abort, so every per-table failure is
//! recorded and the pass continues; the aggregate is raised at the end.

use std::sync::Arc;

use inlet_core::retry::{RetryError, RetryHarness, RetryPolicy};

use crate::error::{Result, StoreError};
use crate::table::TableStore;

/// Per-table maintenance errors counter.
pub const MAINTENANCE_ERRORS: &str = "inlet_maintenance_errors_total";

/// Result of a maintenance pass over one root.
#[derive(Debug, Clone, Default)]
pub struct MaintenanceReport {
    /// Tables successfully processed.
    pub succeeded: Vec<String>,
    /// Tables that failed, with reasons.
    pub failures: Vec<TableFailure>,
}

/// One failed table in a maintenance pass.
#[derive(Debug, Clone)]
pub struct TableFailure {
    /// Path of the failed table.
    pub path: String,
    /// Reason for the failure.
    pub message: String,
}

/// Error raised when any table in a maintenance pass failed.
#[derive(Debug, thiserror::Error)]
pub enum MaintenanceError {
    /// One or more tables failed; siblings were still attempted.
    #[error("{operation} failed for {} of {attempted} tables", failures.len())]
    Failed {
        /// The maintenance operation that ran.
        operation: &'static str,
        /// Number of tables attempted.
        attempted: usize,
        /// The per-table failures.
        failures: Vec<TableFailure>,
    },

    /// Table discovery itself failed; nothing was attempted.
    #[error(transparent)]
    Discovery(#[from] StoreError),
}

/// Walks a root prefix and performs compaction or vacuum on every
/// discovered table.
pub struct MaintenanceEngine<S: TableStore + ?Sized> {
    store: Arc<S>,
    harness: RetryHarness,
    depth_limit: u32,
}

/// Default recursion depth when discovering tables under a root.
pub const DEFAULT_DEPTH_LIMIT: u32 = 3;

impl<S: TableStore + ?Sized> MaintenanceEngine<S> {
    /// Creates a maintenance engine over `store`.
    pub fn new(store: Arc<S>, retry_policy: RetryPolicy) -> Self {
        Self {
            store,
            harness: RetryHarness::new(retry_policy),
            depth_limit: DEFAULT_DEPTH_LIMIT,
        }
    }

    /// Overrides the table-discovery depth limit.
    #[must_use]
    pub fn with_depth_limit(mut self, depth_limit: u32) -> Self {
        self.depth_limit = depth_limit;
        self
    }

    /// Compacts every table below `root`.
    ///
    /// # Errors
    ///
    /// Returns [`MaintenanceError::Failed`] if any table failed after
    /// all tables were attempted, or [`MaintenanceError::Discovery`]
    /// when listing tables failed.
    pub async fn compact_all(&self, root: &str) -> std::result::Result<MaintenanceReport, MaintenanceError> {
        self.run_pass("compact", root, |store, path| async move {
            store.compact(&path).await
        })
        .await
    }

    /// Vacuums every table below `root`.
    ///
    /// # Errors
    ///
    /// Same contract as [`Self::compact_all`].
    pub async fn vacuum_all(&self, root: &str) -> std::result::Result<MaintenanceReport, MaintenanceError> {
        self.run_pass("vacuum", root, |store, path| async move {
            store.vacuum(&path).await
        })
        .await
    }

    async fn run_pass<F, Fut>(
        &self,
        operation: &'static str,
        root: &str,
        op: F,
    ) -> std::result::Result<MaintenanceReport, MaintenanceError>
    where
        F: Fn(Arc<S>, String) -> Fut,
        Fut: std::future::Future<Output = Result<()>>,
    {
        tracing::info!(operation, root, "starting maintenance pass");
        let paths = self.store.list_tables(root, self.depth_limit).await?;
        tracing::info!(operation, root, tables = paths.len(), "discovered tables");

        let mut report = MaintenanceReport::default();
        for path in paths {
            match self.apply(operation, &op, &path).await {
                Ok(()) => {
                    // Manifests are regenerated after every successful
                    // maintenance operation so external engines see the
                    // rewritten file set.
                    if let Err(e) = self.store.refresh_manifest(&path).await {
                        tracing::warn!(operation, path = %path, error = %e, "manifest refresh failed");
                    }
                    report.succeeded.push(path);
                }
                Err(message) => {
                    metrics::counter!(MAINTENANCE_ERRORS, "operation" => operation).increment(1);
                    tracing::error!(operation, path = %path, error = %message, "maintenance failed for table");
                    report.failures.push(TableFailure { path, message });
                }
            }
        }

        tracing::info!(
            operation,
            root,
            succeeded = report.succeeded.len(),
            failed = report.failures.len(),
            "maintenance pass finished"
        );

        if report.failures.is_empty() {
            Ok(report)
        } else {
            let attempted = report.succeeded.len() + report.failures.len();
            Err(MaintenanceError::Failed {
                operation,
                attempted,
                failures: report.failures,
            })
        }
    }

    async fn apply<F, Fut>(
        &self,
        operation: &'static str,
        op: &F,
        path: &str,
    ) -> std::result::Result<(), String>
    where
        F: Fn(Arc<S>, String) -> Fut,
        Fut: std::future::Future<Output = Result<()>>,
    {
        let result = self
            .harness
            .run(operation, StoreError::is_concurrent_modification, || {
                op(self.store.clone(), path.to_string())
            })
            .await;

        match result {
            Ok(()) => Ok(()),
            Err(RetryError::Exhausted { source, .. }) => Err(source.to_string()),
            Err(RetryError::Failed(e)) => Err(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryTableStore;
    use std::time::Duration;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::new(Duration::from_millis(1), Duration::from_millis(2), 0.0, 2).unwrap()
    }

    async fn seeded_store() -> Arc<MemoryTableStore> {
        let store = Arc::new(MemoryTableStore::new());
        for path in ["lake/src/t1", "lake/src/t2", "lake/src/t3"] {
            store.append(path, &[]).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn compacts_every_discovered_table() {
        let store = seeded_store().await;
        let engine = MaintenanceEngine::new(store.clone(), fast_policy());

        let report = engine.compact_all("lake").await.unwrap();
        assert_eq!(report.succeeded.len(), 3);

        for path in ["lake/src/t1", "lake/src/t2", "lake/src/t3"] {
            assert_eq!(store.compaction_count(path), Some(1));
            assert_eq!(store.manifest_version(path), Some(1));
        }
    }

    #[tokio::test]
    async fn vacuums_every_discovered_table() {
        let store = seeded_store().await;
        let engine = MaintenanceEngine::new(store.clone(), fast_policy());

        engine.vacuum_all("lake").await.unwrap();
        for path in ["lake/src/t1", "lake/src/t2", "lake/src/t3"] {
            assert_eq!(store.vacuum_count(path), Some(1));
        }
    }

    /// Delegating store that fails selected operations, for exercising
    /// failure aggregation.
    struct FailingStore {
        inner: Arc<MemoryTableStore>,
        fail_paths: Vec<String>,
        conflict_paths: Vec<String>,
        attempts: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl TableStore for FailingStore {
        async fn exists(&self, path: &str) -> Result<bool> {
            self.inner.exists(path).await
        }
        async fn has_rows(&self, path: &str) -> Result<bool> {
            self.inner.has_rows(path).await
        }
        async fn read_rows(&self, path: &str) -> Result<Vec<crate::row::Row>> {
            self.inner.read_rows(path).await
        }
        async fn append(&self, path: &str, rows: &[crate::row::Row]) -> Result<()> {
            self.inner.append(path, rows).await
        }
        async fn overwrite(
            &self,
            path: &str,
            rows: &[crate::row::Row],
            replace_schema: bool,
        ) -> Result<()> {
            self.inner.overwrite(path, rows, replace_schema).await
        }
        async fn merge(
            &self,
            path: &str,
            rows: &[crate::row::Row],
            key: &inlet_core::schema::PrimaryKey,
            clauses: &crate::table::MergeClauses,
        ) -> Result<crate::table::MergeOutcome> {
            self.inner.merge(path, rows, key, clauses).await
        }
        async fn delete_table(&self, path: &str) -> Result<()> {
            self.inner.delete_table(path).await
        }
        async fn vacuum(&self, path: &str) -> Result<()> {
            self.inner.vacuum(path).await
        }
        async fn compact(&self, path: &str) -> Result<()> {
            self.attempts.lock().unwrap().push(path.to_string());
            if self.fail_paths.iter().any(|p| p == path) {
                return Err(StoreError::storage("failed compaction"));
            }
            if self.conflict_paths.iter().any(|p| p == path) {
                return Err(StoreError::ConcurrentModification {
                    path: path.to_string(),
                });
            }
            self.inner.compact(path).await
        }
        async fn refresh_manifest(&self, path: &str) -> Result<()> {
            self.inner.refresh_manifest(path).await
        }
        async fn list_tables(&self, root: &str, depth_limit: u32) -> Result<Vec<String>> {
            self.inner.list_tables(root, depth_limit).await
        }
    }

    #[tokio::test]
    async fn failures_are_aggregated_and_siblings_attempted() {
        let inner = seeded_store().await;
        let store = Arc::new(FailingStore {
            inner,
            fail_paths: vec!["lake/src/t1".into()],
            conflict_paths: vec!["lake/src/t2".into()],
            attempts: std::sync::Mutex::new(Vec::new()),
        });
        let engine = MaintenanceEngine::new(store.clone(), fast_policy());

        let err = engine.compact_all("lake").await.unwrap_err();
        match err {
            MaintenanceError::Failed {
                operation,
                attempted,
                failures,
            } => {
                assert_eq!(operation, "compact");
                assert_eq!(attempted, 3);
                // t1 fails outright, t2 exhausts its retries.
                assert_eq!(failures.len(), 2);
            }
            MaintenanceError::Discovery(_) => panic!("expected aggregated failure"),
        }

        // Every discovered table was attempted; the conflicting one
        // twice (max_attempts = 2).
        let attempts = store.attempts.lock().unwrap();
        assert_eq!(
            attempts.iter().filter(|p| *p == "lake/src/t1").count(),
            1
        );
        assert_eq!(
            attempts.iter().filter(|p| *p == "lake/src/t2").count(),
            2
        );
        assert_eq!(
            attempts.iter().filter(|p| *p == "lake/src/t3").count(),
            1
        );
    }

    #[tokio::test]
    async fn empty_root_is_a_successful_no_op() {
        let store = seeded_store().await;
        let engine = MaintenanceEngine::new(store, fast_policy());
        let report = engine.vacuum_all("elsewhere").await.unwrap();
        assert!(report.succeeded.is_empty());
        assert!(report.failures.is_empty());
    }
}
