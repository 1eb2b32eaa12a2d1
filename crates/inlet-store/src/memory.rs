//! In-memory table store.
//!
//! Thread-safe via `RwLock`. Backs local runs and tests; commits are
//! serialised by the lock, so genuine concurrent-modification failures
//! only arise through the fault-injecting wrappers the test utilities
//! provide.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use inlet_core::schema::PrimaryKey;

use crate::error::{Result, StoreError};
use crate::row::{row_key, Row, RowKey};
use crate::table::{MatchedAction, MergeClauses, MergeOutcome, TableStore};

/// In-memory versioned keyed table store.
#[derive(Debug, Default)]
pub struct MemoryTableStore {
    tables: RwLock<HashMap<String, TableState>>,
}

#[derive(Debug, Clone, Default)]
struct TableState {
    /// Column set, fixed by the first non-empty write and widened by
    /// appends (the violations zone appends rows of mixed shape).
    columns: Option<Vec<String>>,
    rows: Vec<Row>,
    version: i64,
    manifest_version: i64,
    compactions: u32,
    vacuums: u32,
}

impl TableState {
    fn absorb_columns(&mut self, rows: &[Row]) {
        for row in rows {
            match &mut self.columns {
                None => {
                    if !row.is_empty() {
                        self.columns = Some(row.keys().cloned().collect());
                    }
                }
                Some(columns) => {
                    for column in row.keys() {
                        if !columns.contains(column) {
                            columns.push(column.clone());
                        }
                    }
                }
            }
        }
    }

    fn missing_columns(&self, row: &Row) -> Vec<String> {
        match &self.columns {
            None => Vec::new(),
            Some(columns) => row
                .keys()
                .filter(|c| !columns.contains(*c))
                .cloned()
                .collect(),
        }
    }
}

impl MemoryTableStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current commit version of a table, for assertions.
    #[must_use]
    pub fn table_version(&self, path: &str) -> Option<i64> {
        self.with_state(path, |s| s.version)
    }

    /// Current manifest generation of a table, for assertions.
    #[must_use]
    pub fn manifest_version(&self, path: &str) -> Option<i64> {
        self.with_state(path, |s| s.manifest_version)
    }

    /// Number of compactions run against a table, for assertions.
    #[must_use]
    pub fn compaction_count(&self, path: &str) -> Option<u32> {
        self.with_state(path, |s| s.compactions)
    }

    /// Number of vacuums run against a table, for assertions.
    #[must_use]
    pub fn vacuum_count(&self, path: &str) -> Option<u32> {
        self.with_state(path, |s| s.vacuums)
    }

    fn with_state<T>(&self, path: &str, f: impl FnOnce(&TableState) -> T) -> Option<T> {
        let tables = self.tables.read().ok()?;
        tables.get(&normalise(path).ok()?).map(f)
    }

    fn read_lock(&self) -> Result<std::sync::RwLockReadGuard<'_, HashMap<String, TableState>>> {
        self.tables
            .read()
            .map_err(|_| StoreError::storage("lock poisoned"))
    }

    fn write_lock(&self) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<String, TableState>>> {
        self.tables
            .write()
            .map_err(|_| StoreError::storage("lock poisoned"))
    }
}

fn normalise(path: &str) -> Result<String> {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(StoreError::InvalidPath {
            path: path.to_string(),
        });
    }
    Ok(trimmed.to_string())
}

#[async_trait]
impl TableStore for MemoryTableStore {
    async fn exists(&self, path: &str) -> Result<bool> {
        let path = normalise(path)?;
        Ok(self.read_lock()?.contains_key(&path))
    }

    async fn has_rows(&self, path: &str) -> Result<bool> {
        let path = normalise(path)?;
        Ok(self
            .read_lock()?
            .get(&path)
            .is_some_and(|s| !s.rows.is_empty()))
    }

    async fn read_rows(&self, path: &str) -> Result<Vec<Row>> {
        let path = normalise(path)?;
        Ok(self
            .read_lock()?
            .get(&path)
            .map(|s| s.rows.clone())
            .unwrap_or_default())
    }

    async fn append(&self, path: &str, rows: &[Row]) -> Result<()> {
        let path = normalise(path)?;
        let mut tables = self.write_lock()?;
        let state = tables.entry(path).or_default();
        state.absorb_columns(rows);
        state.rows.extend(rows.iter().cloned());
        state.version += 1;
        Ok(())
    }

    async fn overwrite(&self, path: &str, rows: &[Row], replace_schema: bool) -> Result<()> {
        let path = normalise(path)?;
        let mut tables = self.write_lock()?;
        let state = tables.entry(path.clone()).or_default();

        if replace_schema {
            state.columns = None;
        } else {
            for row in rows {
                let missing = state.missing_columns(row);
                if !missing.is_empty() {
                    return Err(StoreError::SchemaDrift {
                        path,
                        columns: missing,
                    });
                }
            }
        }
        state.absorb_columns(rows);
        state.rows = rows.to_vec();
        state.version += 1;
        Ok(())
    }

    async fn merge(
        &self,
        path: &str,
        rows: &[Row],
        key: &PrimaryKey,
        clauses: &MergeClauses,
    ) -> Result<MergeOutcome> {
        let path = normalise(path)?;
        let mut tables = self.write_lock()?;
        let state = tables.get_mut(&path).ok_or_else(|| StoreError::NotFound {
            path: path.clone(),
        })?;

        for row in rows {
            let written = clauses.written_row(row);
            let missing = state.missing_columns(&written);
            if !missing.is_empty() {
                return Err(StoreError::SchemaDrift {
                    path,
                    columns: missing,
                });
            }
        }

        // Stage the whole commit before touching the table so a failed
        // key extraction leaves the snapshot untouched.
        let mut staged: Vec<(RowKey, Option<Row>)> = Vec::with_capacity(state.rows.len());
        let mut index: HashMap<RowKey, usize> = HashMap::with_capacity(state.rows.len());
        for row in &state.rows {
            let k = row_key(row, key)?;
            index.insert(k.clone(), staged.len());
            staged.push((k, Some(row.clone())));
        }

        let mut outcome = MergeOutcome::default();
        let mut written_rows: Vec<Row> = Vec::new();
        for row in rows {
            let k = row_key(row, key)?;
            let written = clauses.written_row(row);

            if let Some(&slot) = index.get(&k) {
                // First matched clause wins; later clauses are not
                // consulted.
                let action = clauses
                    .matched
                    .iter()
                    .find(|clause| clause.predicate.matches(row))
                    .map(|clause| clause.action);
                match action {
                    Some(MatchedAction::Update) => {
                        staged[slot].1 = Some(written.clone());
                        outcome.updated += 1;
                    }
                    Some(MatchedAction::Delete) => {
                        staged[slot].1 = None;
                        index.remove(&k);
                        outcome.deleted += 1;
                    }
                    None => {}
                }
            } else if let Some(not_matched) = &clauses.not_matched {
                if not_matched.predicate.matches(row) {
                    index.insert(k.clone(), staged.len());
                    staged.push((k, Some(written.clone())));
                    outcome.inserted += 1;
                }
            }
            written_rows.push(written);
        }

        if state.columns.is_none() {
            state.absorb_columns(&written_rows);
        }
        state.rows = staged.into_iter().filter_map(|(_, row)| row).collect();
        state.version += 1;
        Ok(outcome)
    }

    async fn delete_table(&self, path: &str) -> Result<()> {
        let path = normalise(path)?;
        let mut tables = self.write_lock()?;
        tables
            .remove(&path)
            .map(|_| ())
            .ok_or(StoreError::NotFound { path })
    }

    async fn vacuum(&self, path: &str) -> Result<()> {
        let path = normalise(path)?;
        let mut tables = self.write_lock()?;
        let state = tables
            .get_mut(&path)
            .ok_or(StoreError::NotFound { path })?;
        state.vacuums += 1;
        Ok(())
    }

    async fn compact(&self, path: &str) -> Result<()> {
        let path = normalise(path)?;
        let mut tables = self.write_lock()?;
        let state = tables
            .get_mut(&path)
            .ok_or(StoreError::NotFound { path })?;
        state.compactions += 1;
        state.version += 1;
        Ok(())
    }

    async fn refresh_manifest(&self, path: &str) -> Result<()> {
        let path = normalise(path)?;
        let mut tables = self.write_lock()?;
        match tables.get_mut(&path) {
            Some(state) => {
                state.manifest_version += 1;
            }
            None => {
                tracing::warn!(path = %path, "unable to refresh manifest: not a table");
            }
        }
        Ok(())
    }

    async fn list_tables(&self, root: &str, depth_limit: u32) -> Result<Vec<String>> {
        if depth_limit == 0 {
            return Err(StoreError::storage("depth limit must be at least 1"));
        }
        let root = normalise(root)?;
        let prefix = format!("{root}/");

        let tables = self.read_lock()?;
        let relative: Vec<&str> = tables
            .keys()
            .filter_map(|path| path.strip_prefix(&prefix))
            .collect();

        let mut found: Vec<String> = Vec::new();
        for rel in &relative {
            let depth = rel.split('/').count() as u32;
            if depth > depth_limit {
                continue;
            }
            // Recursion prunes at the first table on a branch: a table
            // below another table is never visited.
            let shadowed = relative.iter().any(|other| {
                *other != *rel && rel.starts_with(&format!("{other}/"))
            });
            if !shadowed {
                found.push(format!("{prefix}{rel}"));
            }
        }
        found.sort();
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::row_from_pairs;
    use crate::table::{ClausePredicate, MatchedAction, MergeClauses};
    use serde_json::json;

    fn cdc_clauses() -> MergeClauses {
        MergeClauses::new()
            .when_matched(
                ClausePredicate::ColumnEquals {
                    column: "op".into(),
                    value: json!("I"),
                },
                MatchedAction::Update,
            )
            .when_matched(
                ClausePredicate::ColumnEquals {
                    column: "op".into(),
                    value: json!("U"),
                },
                MatchedAction::Update,
            )
            .when_matched(
                ClausePredicate::ColumnEquals {
                    column: "op".into(),
                    value: json!("D"),
                },
                MatchedAction::Delete,
            )
            .when_not_matched(ClausePredicate::ColumnNotEquals {
                column: "op".into(),
                value: json!("D"),
            })
            .excluding(vec!["op".into()])
    }

    fn key() -> PrimaryKey {
        PrimaryKey::single("id")
    }

    #[tokio::test]
    async fn append_creates_and_extends() {
        let store = MemoryTableStore::new();
        store
            .append("lake/t", &[row_from_pairs(&[("id", json!(1))])])
            .await
            .unwrap();
        store
            .append("lake/t", &[row_from_pairs(&[("id", json!(2))])])
            .await
            .unwrap();

        assert!(store.exists("lake/t").await.unwrap());
        assert!(store.has_rows("lake/t").await.unwrap());
        assert_eq!(store.read_rows("lake/t").await.unwrap().len(), 2);
        assert_eq!(store.table_version("lake/t"), Some(2));
    }

    #[tokio::test]
    async fn merge_on_missing_table_is_not_found() {
        let store = MemoryTableStore::new();
        let err = store
            .merge(
                "lake/missing",
                &[row_from_pairs(&[("id", json!(1)), ("op", json!("I"))])],
                &key(),
                &cdc_clauses(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn merge_applies_first_matching_clause() {
        let store = MemoryTableStore::new();
        store.append("lake/t", &[]).await.unwrap();

        let batch = vec![
            row_from_pairs(&[("id", json!(1)), ("name", json!("a")), ("op", json!("I"))]),
            row_from_pairs(&[("id", json!(2)), ("name", json!("b")), ("op", json!("I"))]),
        ];
        let outcome = store
            .merge("lake/t", &batch, &key(), &cdc_clauses())
            .await
            .unwrap();
        assert_eq!(outcome.inserted, 2);

        // Update then delete the same key inside one batch.
        let batch = vec![
            row_from_pairs(&[("id", json!(1)), ("name", json!("z")), ("op", json!("U"))]),
            row_from_pairs(&[("id", json!(1)), ("name", json!("z")), ("op", json!("D"))]),
        ];
        let outcome = store
            .merge("lake/t", &batch, &key(), &cdc_clauses())
            .await
            .unwrap();
        assert_eq!(outcome.updated, 1);
        assert_eq!(outcome.deleted, 1);

        let rows = store.read_rows("lake/t").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("id"), Some(&json!(2)));
    }

    #[tokio::test]
    async fn delete_of_absent_key_is_a_no_op() {
        let store = MemoryTableStore::new();
        store.append("lake/t", &[]).await.unwrap();

        let outcome = store
            .merge(
                "lake/t",
                &[row_from_pairs(&[("id", json!(7)), ("op", json!("D"))])],
                &key(),
                &cdc_clauses(),
            )
            .await
            .unwrap();
        assert_eq!(outcome, MergeOutcome::default());
        assert!(store.read_rows("lake/t").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reinsert_after_delete_within_one_batch() {
        let store = MemoryTableStore::new();
        store.append("lake/t", &[]).await.unwrap();
        store
            .merge(
                "lake/t",
                &[row_from_pairs(&[
                    ("id", json!(1)),
                    ("name", json!("a")),
                    ("op", json!("I")),
                ])],
                &key(),
                &cdc_clauses(),
            )
            .await
            .unwrap();

        let batch = vec![
            row_from_pairs(&[("id", json!(1)), ("name", json!("a")), ("op", json!("D"))]),
            row_from_pairs(&[("id", json!(1)), ("name", json!("a2")), ("op", json!("I"))]),
        ];
        store
            .merge("lake/t", &batch, &key(), &cdc_clauses())
            .await
            .unwrap();

        let rows = store.read_rows("lake/t").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("name"), Some(&json!("a2")));
    }

    #[tokio::test]
    async fn merge_rejects_schema_drift() {
        let store = MemoryTableStore::new();
        store
            .append("lake/t", &[row_from_pairs(&[("id", json!(1))])])
            .await
            .unwrap();

        let err = store
            .merge(
                "lake/t",
                &[row_from_pairs(&[
                    ("id", json!(2)),
                    ("surprise", json!("x")),
                    ("op", json!("I")),
                ])],
                &key(),
                &cdc_clauses(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::SchemaDrift { columns, .. } if columns == ["surprise"]));
    }

    #[tokio::test]
    async fn overwrite_replaces_contents() {
        let store = MemoryTableStore::new();
        store
            .append("lake/t", &[row_from_pairs(&[("id", json!(1))])])
            .await
            .unwrap();
        store
            .overwrite("lake/t", &[row_from_pairs(&[("pk", json!("a"))])], true)
            .await
            .unwrap();

        let rows = store.read_rows("lake/t").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("pk"), Some(&json!("a")));
    }

    #[tokio::test]
    async fn overwrite_without_schema_swap_rejects_new_columns() {
        let store = MemoryTableStore::new();
        store
            .append("lake/t", &[row_from_pairs(&[("id", json!(1))])])
            .await
            .unwrap();

        let err = store
            .overwrite("lake/t", &[row_from_pairs(&[("pk", json!("a"))])], false)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::SchemaDrift { .. }));
    }

    #[tokio::test]
    async fn maintenance_primitives_require_the_table() {
        let store = MemoryTableStore::new();
        assert!(matches!(
            store.vacuum("lake/missing").await.unwrap_err(),
            StoreError::NotFound { .. }
        ));
        assert!(matches!(
            store.compact("lake/missing").await.unwrap_err(),
            StoreError::NotFound { .. }
        ));
        assert!(matches!(
            store.delete_table("lake/missing").await.unwrap_err(),
            StoreError::NotFound { .. }
        ));
        // Manifest refresh of a missing table only warns.
        store.refresh_manifest("lake/missing").await.unwrap();
    }

    #[tokio::test]
    async fn list_tables_prunes_and_honours_depth() {
        let store = MemoryTableStore::new();
        for path in [
            "lake/a/t1",
            "lake/a/t1/nested",
            "lake/b/t2",
            "lake/c/d/e/t3",
        ] {
            store.append(path, &[]).await.unwrap();
        }

        // Depth 2 reaches a/t1 and b/t2; t3 is deeper; the table nested
        // under t1 is pruned.
        let found = store.list_tables("lake", 2).await.unwrap();
        assert_eq!(found, vec!["lake/a/t1", "lake/b/t2"]);

        let found = store.list_tables("lake", 4).await.unwrap();
        assert_eq!(found, vec!["lake/a/t1", "lake/b/t2", "lake/c/d/e/t3"]);

        assert!(store.list_tables("lake", 0).await.is_err());
    }
}
