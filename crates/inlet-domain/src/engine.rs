//! The domain refresh engine.
//!
//! Keeps domain tables current from two directions:
//!
//! - **Incremental**: every micro-batch hands the engine the CDC slice
//!   that merged for one source table. Each planned domain table
//!   consuming that source re-evaluates its transform over the slice
//!   and merges the derived rows onto the domain target. A failing
//!   table never aborts the remaining tables; the error is logged and
//!   surfaced as a batch-level warning.
//! - **Full refresh**: the domain job resolves one definition by name
//!   and either materialises the target from the full source tables
//!   (`insert`/`update`, overwriting the target) or removes it
//!   (`delete`), keeping the catalogue registration in step.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use inlet_core::event::{Operation, OPERATION};
use inlet_core::paths::{table_path, TableIdentifier};
use inlet_core::schema::PrimaryKey;
use inlet_ingest::{CdcSliceHandler, MergeEngine};
use inlet_store::{Row, TableStore};

use crate::catalog::{self, CatalogTableSpec, DomainCatalog};
use crate::definition::{DomainRegistry, PlannedTable, RefreshPlan};
use crate::error::{DomainError, Result};
use crate::metrics::{DOMAIN_REFRESH_FAILURES, DOMAIN_TABLES_REFRESHED};

/// Errors raised by the query engine.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    /// Transform evaluation failed.
    #[error("query evaluation failed: {message}")]
    Evaluation {
        /// Description of the failure.
        message: String,
    },
}

/// One named input table handed to the query engine.
#[derive(Debug, Clone)]
pub struct QueryInput {
    /// Name the transform references (`source.table`).
    pub name: String,
    /// The input rows.
    pub rows: Vec<Row>,
}

/// Evaluates a SELECT expression over named input tables.
///
/// The SQL engine itself is an external collaborator; tests supply a
/// fake instance.
#[async_trait]
pub trait QueryEngine: Send + Sync {
    /// Evaluates `view_text` with the given inputs, returning the
    /// derived row set.
    async fn evaluate(&self, inputs: &[QueryInput], view_text: &str) -> std::result::Result<Vec<Row>, QueryError>;
}

/// The operation a domain job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainOperation {
    /// Materialise a new domain table.
    Insert,
    /// Re-materialise an existing domain table.
    Update,
    /// Remove a domain table.
    Delete,
}

impl DomainOperation {
    /// Parses the operation name, case-insensitively.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::UnknownOperation`] for anything outside
    /// `insert`, `update`, `delete`.
    pub fn parse(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "insert" => Ok(DomainOperation::Insert),
            "update" => Ok(DomainOperation::Update),
            "delete" => Ok(DomainOperation::Delete),
            _ => Err(DomainError::UnknownOperation {
                name: name.to_string(),
            }),
        }
    }
}

/// Catalogue wiring for domain table registration.
#[derive(Clone)]
pub struct CatalogBinding {
    /// The external catalogue.
    pub catalog: Arc<dyn DomainCatalog>,
    /// Database registrations land in.
    pub database: String,
}

/// A non-fatal, batch-level warning from an incremental refresh.
#[derive(Debug, Clone)]
pub struct DomainWarning {
    /// Owning domain.
    pub domain: String,
    /// Affected table.
    pub table: String,
    /// Failure description.
    pub message: String,
}

/// Builds and incrementally refreshes domain tables.
pub struct DomainRefreshEngine<S: TableStore + ?Sized> {
    store: Arc<S>,
    query: Arc<dyn QueryEngine>,
    merge: Arc<MergeEngine<S>>,
    plan: RefreshPlan,
    target_root: String,
    curated_root: String,
    catalog: Option<CatalogBinding>,
}

impl<S: TableStore + ?Sized> DomainRefreshEngine<S> {
    /// Creates a refresh engine.
    pub fn new(
        store: Arc<S>,
        query: Arc<dyn QueryEngine>,
        merge: Arc<MergeEngine<S>>,
        plan: RefreshPlan,
        target_root: impl Into<String>,
        curated_root: impl Into<String>,
    ) -> Self {
        Self {
            store,
            query,
            merge,
            plan,
            target_root: target_root.into(),
            curated_root: curated_root.into(),
            catalog: None,
        }
    }

    /// Binds the external catalogue for registration.
    #[must_use]
    pub fn with_catalog(mut self, binding: CatalogBinding) -> Self {
        self.catalog = Some(binding);
        self
    }

    /// Incrementally refreshes every planned domain table consuming
    /// `source.table` from the merged CDC slice. Failures are returned
    /// as warnings; remaining tables still run.
    pub async fn refresh_from_cdc(
        &self,
        source: &str,
        table: &str,
        rows: &[Row],
    ) -> Vec<DomainWarning> {
        let input_name = format!("{source}.{table}");
        let mut warnings = Vec::new();

        for planned in self.plan.tables_for_source(&input_name) {
            match self.refresh_table_from_slice(planned, &input_name, rows).await {
                Ok(true) => {
                    metrics::counter!(DOMAIN_TABLES_REFRESHED).increment(1);
                }
                Ok(false) => {}
                Err(e) => {
                    metrics::counter!(DOMAIN_REFRESH_FAILURES).increment(1);
                    tracing::warn!(
                        domain = %planned.domain,
                        table = %planned.table.name,
                        error = %e,
                        "domain refresh failed for table; continuing"
                    );
                    warnings.push(DomainWarning {
                        domain: planned.domain.clone(),
                        table: planned.table.name.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }
        warnings
    }

    /// Refreshes one planned table from the slice. Returns whether any
    /// derived rows were applied.
    async fn refresh_table_from_slice(
        &self,
        planned: &PlannedTable,
        input_name: &str,
        rows: &[Row],
    ) -> Result<bool> {
        let runs = operation_runs(rows);
        if runs.is_empty() {
            return Ok(false);
        }

        let path = table_path(&self.target_root, &planned.domain, &planned.table.name);
        let key = PrimaryKey::single(planned.table.primary_key.clone());
        let mut applied = false;

        // Contiguous same-operation runs preserve event order across
        // operations within the slice.
        for (operation, run) in runs {
            let inputs = vec![QueryInput {
                name: input_name.to_string(),
                rows: run,
            }];
            let derived = self
                .query
                .evaluate(&inputs, &planned.table.transform.view_text)
                .await?;
            if derived.is_empty() {
                continue;
            }

            let annotated: Vec<Row> = derived
                .into_iter()
                .map(|mut row| {
                    row.insert(
                        OPERATION.to_string(),
                        Value::String(operation.wire_code().to_string()),
                    );
                    row
                })
                .collect();

            tracing::debug!(
                domain = %planned.domain,
                table = %planned.table.name,
                operation = %operation,
                rows = annotated.len(),
                "merging derived rows onto domain table"
            );
            self.merge
                .merge_cdc(&path, &annotated, &key)
                .await
                .map_err(|e| DomainError::RefreshFailed {
                    failures: vec![format!("{}.{}: {e}", planned.domain, planned.table.name)],
                })?;
            applied = true;
        }

        if applied {
            self.store.refresh_manifest(&path).await?;
        }
        Ok(applied)
    }

    /// Runs a full-refresh domain job: resolve definitions by name and
    /// apply the operation to the named table. A failing domain does
    /// not abort its siblings; the aggregate is raised at the end.
    ///
    /// # Errors
    ///
    /// [`DomainError::RefreshFailed`] aggregating per-domain failures,
    /// or the specific error for delete mode.
    pub async fn run(
        &self,
        registry: &DomainRegistry,
        domain_name: &str,
        table_name: &str,
        operation: DomainOperation,
    ) -> Result<()> {
        if operation == DomainOperation::Delete {
            return self.delete_target(domain_name, table_name).await;
        }

        let definitions = registry.get_for_name(domain_name);
        tracing::info!(
            domain = domain_name,
            count = definitions.len(),
            "located domains for name"
        );

        let mut failures = Vec::new();
        for definition in definitions {
            let prefix = format!(
                "processing of domain {} operation {operation:?}",
                definition.name
            );
            tracing::info!("{prefix} started");
            match self.materialise(definition, table_name, operation).await {
                Ok(()) => tracing::info!("{prefix} completed"),
                Err(e) => {
                    tracing::error!(error = %e, "{prefix} failed");
                    failures.push(format!("{}: {e}", definition.name));
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(DomainError::RefreshFailed { failures })
        }
    }

    async fn materialise(
        &self,
        definition: &crate::definition::DomainDefinition,
        table_name: &str,
        operation: DomainOperation,
    ) -> Result<()> {
        let table = definition
            .tables
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(table_name))
            .ok_or_else(|| DomainError::UnknownTable {
                domain: definition.name.clone(),
                table: table_name.to_string(),
            })?;

        let mut inputs = Vec::with_capacity(table.transform.sources.len());
        for source in &table.transform.sources {
            let (src, tbl) = source
                .split_once('.')
                .ok_or_else(|| DomainError::InvalidDefinition {
                    domain: definition.name.clone(),
                    message: format!("malformed source {source:?}"),
                })?;
            let rows = self
                .store
                .read_rows(&table_path(&self.curated_root, src, tbl))
                .await?;
            inputs.push(QueryInput {
                name: source.clone(),
                rows,
            });
        }

        let derived = self.query.evaluate(&inputs, &table.transform.view_text).await?;
        let path = table_path(&self.target_root, &definition.name, &table.name);

        if operation == DomainOperation::Insert && self.store.exists(&path).await? {
            return Err(DomainError::TargetExists { path });
        }

        tracing::info!(
            domain = %definition.name,
            table = %table.name,
            rows = derived.len(),
            path = %path,
            "materialising domain table"
        );
        self.store.overwrite(&path, &derived, true).await?;
        self.store.refresh_manifest(&path).await?;

        if let Some(binding) = &self.catalog {
            let identifier =
                TableIdentifier::new(&binding.database, &definition.name, &table.name);
            let spec = CatalogTableSpec::for_table(&identifier, &path, &derived)?;
            match operation {
                DomainOperation::Insert => catalog::create(binding.catalog.as_ref(), &spec).await?,
                DomainOperation::Update => {
                    catalog::replace(binding.catalog.as_ref(), &spec).await?;
                }
                DomainOperation::Delete => unreachable!("delete handled before materialise"),
            }
        }
        Ok(())
    }

    async fn delete_target(&self, domain_name: &str, table_name: &str) -> Result<()> {
        let path = table_path(&self.target_root, domain_name, table_name);
        if self.store.exists(&path).await? {
            self.store.delete_table(&path).await?;
            tracing::info!(path = %path, "domain table removed");
        } else {
            tracing::warn!(path = %path, "domain table not found; nothing removed");
        }

        if let Some(binding) = &self.catalog {
            catalog::drop_table(
                binding.catalog.as_ref(),
                &binding.database,
                domain_name,
                table_name,
            )
            .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl<S: TableStore + ?Sized> CdcSliceHandler for DomainRefreshEngine<S> {
    async fn handle_slice(
        &self,
        source: &str,
        table: &str,
        rows: &[Row],
    ) -> inlet_ingest::Result<()> {
        // Warnings are logged inside; a domain failure never fails the
        // batch.
        let _warnings = self.refresh_from_cdc(source, table, rows).await;
        Ok(())
    }
}

/// Splits a CDC slice into contiguous same-operation runs, preserving
/// slice order. Rows without a CDC operation (initial load) are
/// skipped.
fn operation_runs(rows: &[Row]) -> Vec<(Operation, Vec<Row>)> {
    let mut runs: Vec<(Operation, Vec<Row>)> = Vec::new();
    for row in rows {
        let Some(operation) = row
            .get(OPERATION)
            .and_then(Value::as_str)
            .and_then(|code| Operation::from_wire(code).ok())
        else {
            continue;
        };
        if !operation.is_cdc() {
            continue;
        }

        match runs.last_mut() {
            Some((current, run)) if *current == operation => run.push(row.clone()),
            _ => runs.push((operation, vec![row.clone()])),
        }
    }
    runs
}

#[cfg(test)]
mod tests {
    use super::*;
    use inlet_store::row_from_pairs;
    use serde_json::json;

    #[test]
    fn runs_preserve_slice_order() {
        let rows = vec![
            row_from_pairs(&[("id", json!(1)), ("op", json!("I"))]),
            row_from_pairs(&[("id", json!(2)), ("op", json!("I"))]),
            row_from_pairs(&[("id", json!(1)), ("op", json!("D"))]),
            row_from_pairs(&[("id", json!(1)), ("op", json!("I"))]),
            row_from_pairs(&[("id", json!(3)), ("op", json!("L"))]),
        ];

        let runs = operation_runs(&rows);
        let shape: Vec<(Operation, usize)> =
            runs.iter().map(|(op, run)| (*op, run.len())).collect();
        assert_eq!(
            shape,
            vec![
                (Operation::Insert, 2),
                (Operation::Delete, 1),
                (Operation::Insert, 1),
            ]
        );
    }

    #[test]
    fn operation_names_parse_case_insensitively() {
        assert_eq!(
            DomainOperation::parse("INSERT").unwrap(),
            DomainOperation::Insert
        );
        assert_eq!(
            DomainOperation::parse("update").unwrap(),
            DomainOperation::Update
        );
        assert_eq!(
            DomainOperation::parse("Delete").unwrap(),
            DomainOperation::Delete
        );
        assert!(DomainOperation::parse("upsert").is_err());
    }
}
