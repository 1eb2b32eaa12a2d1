//! The table store contract and the clause-ordered merge model.

use async_trait::async_trait;
use serde_json::Value;

use inlet_core::schema::PrimaryKey;

use crate::error::Result;
use crate::row::Row;

/// Predicate a merge clause applies to the incoming row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClausePredicate {
    /// Matches every row.
    Always,
    /// Matches rows whose column equals the value.
    ColumnEquals {
        /// Column inspected on the incoming row.
        column: String,
        /// Value to compare against.
        value: Value,
    },
    /// Matches rows whose column differs from the value (or is absent).
    ColumnNotEquals {
        /// Column inspected on the incoming row.
        column: String,
        /// Value to compare against.
        value: Value,
    },
}

impl ClausePredicate {
    /// Evaluates the predicate against an incoming row.
    #[must_use]
    pub fn matches(&self, row: &Row) -> bool {
        match self {
            ClausePredicate::Always => true,
            ClausePredicate::ColumnEquals { column, value } => {
                row.get(column).is_some_and(|v| v == value)
            }
            ClausePredicate::ColumnNotEquals { column, value } => {
                row.get(column).map_or(true, |v| v != value)
            }
        }
    }
}

/// Action taken when a matched clause fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchedAction {
    /// Replace all target columns with the incoming row.
    Update,
    /// Delete the target row.
    Delete,
}

/// One `when matched` clause.
#[derive(Debug, Clone)]
pub struct MatchedClause {
    /// Predicate over the incoming row.
    pub predicate: ClausePredicate,
    /// Action when the predicate fires.
    pub action: MatchedAction,
}

/// The single `when not matched` clause; the action is always insert.
#[derive(Debug, Clone)]
pub struct NotMatchedClause {
    /// Predicate over the incoming row.
    pub predicate: ClausePredicate,
}

/// A clause-ordered merge description.
///
/// The store must evaluate matched clauses in declaration order and
/// stop at the first whose predicate accepts the incoming row. The
/// ordering is load-bearing: CDC installs insert, update, delete in
/// that order so that a replayed insert of an already-deleted key
/// overwrites rather than silently vanishing.
#[derive(Debug, Clone, Default)]
pub struct MergeClauses {
    /// Matched clauses, in declaration order.
    pub matched: Vec<MatchedClause>,
    /// Optional unmatched-insert clause.
    pub not_matched: Option<NotMatchedClause>,
    /// Columns excluded from the written expression (bookkeeping
    /// columns such as the op code and commit timestamp).
    pub exclude_columns: Vec<String>,
}

impl MergeClauses {
    /// Creates an empty clause set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a matched clause.
    #[must_use]
    pub fn when_matched(mut self, predicate: ClausePredicate, action: MatchedAction) -> Self {
        self.matched.push(MatchedClause { predicate, action });
        self
    }

    /// Installs the unmatched-insert clause.
    #[must_use]
    pub fn when_not_matched(mut self, predicate: ClausePredicate) -> Self {
        self.not_matched = Some(NotMatchedClause { predicate });
        self
    }

    /// Sets the columns excluded from written expressions.
    #[must_use]
    pub fn excluding(mut self, columns: Vec<String>) -> Self {
        self.exclude_columns = columns;
        self
    }

    /// Projects an incoming row to its written form.
    #[must_use]
    pub fn written_row(&self, row: &Row) -> Row {
        row.iter()
            .filter(|(column, _)| !self.exclude_columns.iter().any(|c| c == *column))
            .map(|(column, value)| (column.clone(), value.clone()))
            .collect()
    }
}

/// Row counts from one merge commit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Rows inserted by the unmatched clause.
    pub inserted: u64,
    /// Rows replaced by a matched update.
    pub updated: u64,
    /// Rows removed by a matched delete.
    pub deleted: u64,
}

/// A versioned keyed table store.
///
/// The contract the pipeline relies on (the implementation must
/// enforce): snapshot isolation on read; optimistic concurrency on
/// commit; a commit applies in full or not at all; conflicting commits
/// fail with [`crate::StoreError::ConcurrentModification`].
#[async_trait]
pub trait TableStore: Send + Sync {
    /// Returns whether a table exists at `path`.
    async fn exists(&self, path: &str) -> Result<bool>;

    /// Returns whether the table exists and holds at least one row.
    async fn has_rows(&self, path: &str) -> Result<bool>;

    /// Reads the current snapshot of the table.
    ///
    /// Returns an empty set when the table does not exist.
    async fn read_rows(&self, path: &str) -> Result<Vec<Row>>;

    /// Appends rows without key reconciliation, creating the table on
    /// first write.
    async fn append(&self, path: &str, rows: &[Row]) -> Result<()>;

    /// Fully replaces the table contents; the schema is swapped only
    /// when `replace_schema` is set.
    async fn overwrite(&self, path: &str, rows: &[Row], replace_schema: bool) -> Result<()>;

    /// Atomically merges `rows` onto the table under the clause-ordered
    /// semantics of [`MergeClauses`], joining on `key`.
    ///
    /// Fails with `NotFound` when the table does not exist and with
    /// `SchemaDrift` when incoming rows carry columns the target lacks.
    async fn merge(
        &self,
        path: &str,
        rows: &[Row],
        key: &PrimaryKey,
        clauses: &MergeClauses,
    ) -> Result<MergeOutcome>;

    /// Removes the table entirely.
    async fn delete_table(&self, path: &str) -> Result<()>;

    /// Reclaims files no longer referenced by the table.
    async fn vacuum(&self, path: &str) -> Result<()>;

    /// Rewrites small files into larger ones.
    async fn compact(&self, path: &str) -> Result<()>;

    /// Regenerates the symlink manifest external query engines consume.
    ///
    /// A missing table is logged, not an error.
    async fn refresh_manifest(&self, path: &str) -> Result<()>;

    /// Recursively enumerates all tables below `root`, pruning
    /// recursion at the first table found on a branch and descending at
    /// most `depth_limit` levels (`depth_limit >= 1`).
    async fn list_tables(&self, root: &str, depth_limit: u32) -> Result<Vec<String>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::row_from_pairs;
    use serde_json::json;

    #[test]
    fn predicates_inspect_the_incoming_row() {
        let row = row_from_pairs(&[("op", json!("I"))]);

        assert!(ClausePredicate::Always.matches(&row));
        assert!(ClausePredicate::ColumnEquals {
            column: "op".into(),
            value: json!("I"),
        }
        .matches(&row));
        assert!(!ClausePredicate::ColumnEquals {
            column: "op".into(),
            value: json!("D"),
        }
        .matches(&row));
        assert!(ClausePredicate::ColumnNotEquals {
            column: "op".into(),
            value: json!("D"),
        }
        .matches(&row));
    }

    #[test]
    fn absent_column_never_equals() {
        let row = row_from_pairs(&[("id", json!(1))]);
        assert!(!ClausePredicate::ColumnEquals {
            column: "op".into(),
            value: json!("I"),
        }
        .matches(&row));
        assert!(ClausePredicate::ColumnNotEquals {
            column: "op".into(),
            value: json!("I"),
        }
        .matches(&row));
    }

    #[test]
    fn written_row_drops_excluded_columns() {
        let clauses = MergeClauses::new().excluding(vec!["op".into(), "_commit_ts".into()]);
        let row = row_from_pairs(&[
            ("id", json!(1)),
            ("op", json!("I")),
            ("_commit_ts", json!("2024-01-01T00:00:00Z")),
        ]);

        let written = clauses.written_row(&row);
        assert_eq!(written.len(), 1);
        assert_eq!(written.get("id"), Some(&json!(1)));
    }
}
