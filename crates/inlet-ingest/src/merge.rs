//! The CDC merge engine.
//!
//! Applies a micro-batch of CDC rows onto a target table with
//! insert/update/delete semantics. The matched clauses are installed in
//! the order insert, update, delete; the store evaluates them in
//! declaration order, so the delete clause must come last: insert and
//! update share the same action body, and a replayed insert of an
//! already-deleted key has to overwrite rather than silently vanish.
//!
//! Every merge passes through the retry harness, filtered to the
//! distinguished concurrent-modification error. Exhaustion surfaces as
//! [`MergeError::RetriesExhausted`] so the caller can divert the batch
//! to the violations zone instead of aborting the stream.

use std::sync::Arc;

use serde_json::Value;

use inlet_core::event::{Operation, COMMIT_TIMESTAMP, OPERATION};
use inlet_core::retry::{RetryError, RetryHarness, RetryPolicy};
use inlet_core::schema::PrimaryKey;
use inlet_store::{
    ClausePredicate, MatchedAction, MergeClauses, MergeOutcome, Row, StoreError, TableStore,
};

/// Errors from one merge invocation.
#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    /// Every attempt failed with a concurrent-modification conflict.
    ///
    /// The caller routes the batch to the violations zone and the
    /// stream continues.
    #[error("merge retries exhausted for {path} after {attempts} attempts")]
    RetriesExhausted {
        /// Path of the contended table.
        path: String,
        /// Attempts made before giving up.
        attempts: u32,
        /// The last underlying conflict.
        #[source]
        source: StoreError,
    },

    /// A non-retryable store failure (schema drift, missing table in a
    /// strict mode, infrastructure).
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Applies micro-batches of CDC rows onto keyed target tables.
pub struct MergeEngine<S: TableStore + ?Sized> {
    store: Arc<S>,
    harness: RetryHarness,
    exclude_columns: Vec<String>,
}

impl<S: TableStore + ?Sized> MergeEngine<S> {
    /// Creates a merge engine with the given retry policy. The
    /// operation code and commit timestamp are excluded from written
    /// expressions by default.
    pub fn new(store: Arc<S>, retry_policy: RetryPolicy) -> Self {
        Self {
            store,
            harness: RetryHarness::new(retry_policy),
            exclude_columns: vec![OPERATION.to_string(), COMMIT_TIMESTAMP.to_string()],
        }
    }

    /// Overrides the columns excluded from written expressions.
    #[must_use]
    pub fn with_excluded_columns(mut self, columns: Vec<String>) -> Self {
        self.exclude_columns = columns;
        self
    }

    /// Applies a CDC batch in cdc mode: the target is created on demand
    /// and the full insert/update/delete clause set is installed.
    ///
    /// # Errors
    ///
    /// [`MergeError::RetriesExhausted`] after exhausted conflicts, or
    /// [`MergeError::Store`] for non-retryable failures (schema drift
    /// is surfaced here and is not retried).
    pub async fn merge_cdc(
        &self,
        path: &str,
        rows: &[Row],
        key: &PrimaryKey,
    ) -> Result<MergeOutcome, MergeError> {
        if rows.is_empty() {
            return Ok(MergeOutcome::default());
        }

        if !self.store.exists(path).await? {
            // Create the target on demand with the batch schema.
            self.store.append(path, &[]).await?;
        }

        let clauses = self.cdc_clauses();
        tracing::debug!(path, rows = rows.len(), "merging cdc batch");
        self.run_merge(path, rows, key, &clauses).await
    }

    /// Applies an initial-load batch: if the target does not exist the
    /// rows are appended; otherwise a merge with only an
    /// unmatched-insert clause makes re-delivery of the same batch
    /// idempotent.
    ///
    /// # Errors
    ///
    /// Same contract as [`Self::merge_cdc`].
    pub async fn load_distinct(
        &self,
        path: &str,
        rows: &[Row],
        key: &PrimaryKey,
    ) -> Result<(), MergeError> {
        if rows.is_empty() {
            return Ok(());
        }

        let clauses = self.load_clauses();
        if self.store.exists(path).await? {
            tracing::debug!(path, rows = rows.len(), "merging distinct load batch");
            self.run_merge(path, rows, key, &clauses).await?;
        } else {
            let written: Vec<Row> = rows.iter().map(|r| clauses.written_row(r)).collect();
            tracing::debug!(path, rows = rows.len(), "appending initial load batch");
            self.retry_store(path, || self.store.append(path, &written))
                .await?;
        }
        Ok(())
    }

    /// Updates every matched row. A missing target is logged and the
    /// batch skipped; this mode never creates tables.
    ///
    /// # Errors
    ///
    /// Same contract as [`Self::merge_cdc`].
    pub async fn update_matching(
        &self,
        path: &str,
        rows: &[Row],
        key: &PrimaryKey,
    ) -> Result<(), MergeError> {
        if !self.store.exists(path).await? {
            tracing::error!(path, "failed to update table: target is not present");
            return Ok(());
        }
        let clauses = MergeClauses::new()
            .when_matched(ClausePredicate::Always, MatchedAction::Update)
            .excluding(self.exclude_columns.clone());
        self.run_merge(path, rows, key, &clauses).await.map(|_| ())
    }

    /// Deletes every matched row. A missing target is logged and the
    /// batch skipped.
    ///
    /// # Errors
    ///
    /// Same contract as [`Self::merge_cdc`].
    pub async fn delete_matching(
        &self,
        path: &str,
        rows: &[Row],
        key: &PrimaryKey,
    ) -> Result<(), MergeError> {
        if !self.store.exists(path).await? {
            tracing::error!(path, "failed to delete from table: target is not present");
            return Ok(());
        }
        let clauses = MergeClauses::new()
            .when_matched(ClausePredicate::Always, MatchedAction::Delete)
            .excluding(self.exclude_columns.clone());
        self.run_merge(path, rows, key, &clauses).await.map(|_| ())
    }

    /// The cdc clause set. Clause order is a contract; see the module
    /// docs.
    fn cdc_clauses(&self) -> MergeClauses {
        MergeClauses::new()
            .when_matched(op_equals(Operation::Insert), MatchedAction::Update)
            .when_matched(op_equals(Operation::Update), MatchedAction::Update)
            .when_matched(op_equals(Operation::Delete), MatchedAction::Delete)
            .when_not_matched(ClausePredicate::ColumnNotEquals {
                column: OPERATION.to_string(),
                value: wire_value(Operation::Delete),
            })
            .excluding(self.exclude_columns.clone())
    }

    /// The load clause set: unmatched rows insert, matched rows are
    /// left untouched.
    fn load_clauses(&self) -> MergeClauses {
        MergeClauses::new()
            .when_not_matched(ClausePredicate::Always)
            .excluding(self.exclude_columns.clone())
    }

    async fn run_merge(
        &self,
        path: &str,
        rows: &[Row],
        key: &PrimaryKey,
        clauses: &MergeClauses,
    ) -> Result<MergeOutcome, MergeError> {
        self.retry_store(path, || self.store.merge(path, rows, key, clauses))
            .await
    }

    async fn retry_store<T, Fut>(
        &self,
        path: &str,
        op: impl FnMut() -> Fut,
    ) -> Result<T, MergeError>
    where
        Fut: std::future::Future<Output = Result<T, StoreError>>,
    {
        self.harness
            .run("merge", StoreError::is_concurrent_modification, op)
            .await
            .map_err(|e| match e {
                RetryError::Exhausted {
                    attempts, source, ..
                } => MergeError::RetriesExhausted {
                    path: path.to_string(),
                    attempts,
                    source,
                },
                RetryError::Failed(e) => MergeError::Store(e),
            })
    }
}

fn op_equals(operation: Operation) -> ClausePredicate {
    ClausePredicate::ColumnEquals {
        column: OPERATION.to_string(),
        value: wire_value(operation),
    }
}

fn wire_value(operation: Operation) -> Value {
    Value::String(operation.wire_code().to_string())
}

/// Classifies a store failure as data-shaped (stream continues) or
/// infrastructure (fatal to the streaming query).
#[must_use]
pub fn is_data_failure(error: &StoreError) -> bool {
    matches!(
        error,
        StoreError::SchemaDrift { .. }
            | StoreError::NotFound { .. }
            | StoreError::MissingKeyColumn { .. }
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use inlet_store::{row_from_pairs, MemoryTableStore};
    use serde_json::json;
    use std::time::Duration;

    fn policy() -> RetryPolicy {
        RetryPolicy::new(Duration::from_millis(1), Duration::from_millis(2), 0.0, 3).unwrap()
    }

    fn key() -> PrimaryKey {
        PrimaryKey::single("id")
    }

    fn cdc_row(id: i64, name: &str, op: Operation) -> Row {
        row_from_pairs(&[
            ("id", json!(id)),
            ("name", json!(name)),
            ("op", json!(op.wire_code())),
            ("_commit_ts", json!("2024-01-01T00:00:00Z")),
        ])
    }

    #[tokio::test]
    async fn cdc_creates_target_on_demand() {
        let store = Arc::new(MemoryTableStore::new());
        let engine = MergeEngine::new(store.clone(), policy());

        let outcome = engine
            .merge_cdc(
                "lake/oms/offenders",
                &[
                    cdc_row(1, "a", Operation::Insert),
                    cdc_row(2, "b", Operation::Insert),
                ],
                &key(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.inserted, 2);
        let rows = store.read_rows("lake/oms/offenders").await.unwrap();
        assert_eq!(rows.len(), 2);
        // Bookkeeping columns are excluded from the destination.
        assert!(!rows[0].contains_key("op"));
        assert!(!rows[0].contains_key("_commit_ts"));
    }

    #[tokio::test]
    async fn update_then_delete_of_same_key_leaves_no_row() {
        let store = Arc::new(MemoryTableStore::new());
        let engine = MergeEngine::new(store.clone(), policy());

        engine
            .merge_cdc(
                "lake/t",
                &[cdc_row(1, "a", Operation::Insert)],
                &key(),
            )
            .await
            .unwrap();
        engine
            .merge_cdc(
                "lake/t",
                &[
                    cdc_row(1, "z", Operation::Update),
                    cdc_row(1, "z", Operation::Delete),
                ],
                &key(),
            )
            .await
            .unwrap();

        assert!(store.read_rows("lake/t").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn replay_of_a_batch_is_idempotent() {
        let store = Arc::new(MemoryTableStore::new());
        let engine = MergeEngine::new(store.clone(), policy());

        let batch = vec![
            cdc_row(1, "a", Operation::Insert),
            cdc_row(2, "b", Operation::Update),
            cdc_row(3, "c", Operation::Delete),
        ];
        engine.merge_cdc("lake/t", &batch, &key()).await.unwrap();
        let first = store.read_rows("lake/t").await.unwrap();

        engine.merge_cdc("lake/t", &batch, &key()).await.unwrap();
        let second = store.read_rows("lake/t").await.unwrap();

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn load_distinct_tolerates_redelivery() {
        let store = Arc::new(MemoryTableStore::new());
        let engine = MergeEngine::new(store.clone(), policy());

        let batch = vec![
            cdc_row(1, "a", Operation::Load),
            cdc_row(2, "b", Operation::Load),
        ];
        engine.load_distinct("lake/t", &batch, &key()).await.unwrap();
        engine.load_distinct("lake/t", &batch, &key()).await.unwrap();

        assert_eq!(store.read_rows("lake/t").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn strict_modes_skip_missing_targets() {
        let store = Arc::new(MemoryTableStore::new());
        let engine = MergeEngine::new(store.clone(), policy());

        engine
            .update_matching("lake/none", &[cdc_row(1, "a", Operation::Update)], &key())
            .await
            .unwrap();
        engine
            .delete_matching("lake/none", &[cdc_row(1, "a", Operation::Delete)], &key())
            .await
            .unwrap();
        assert!(!store.exists("lake/none").await.unwrap());
    }

    #[tokio::test]
    async fn schema_drift_is_not_retried() {
        let store = Arc::new(MemoryTableStore::new());
        store
            .append("lake/t", &[row_from_pairs(&[("id", json!(1))])])
            .await
            .unwrap();
        let engine = MergeEngine::new(store, policy());

        let mut row = cdc_row(1, "a", Operation::Insert);
        row.insert("extra".into(), json!(true));
        let err = engine.merge_cdc("lake/t", &[row], &key()).await.unwrap_err();
        assert!(matches!(
            err,
            MergeError::Store(StoreError::SchemaDrift { .. })
        ));
    }
}
