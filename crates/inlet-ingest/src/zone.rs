//! Zone processing for one micro-batch.
//!
//! Three zones share a common pattern: validate where a schema exists,
//! write conforming rows, route the rest to violations, refresh the
//! manifest. The raw zone is an unvalidated archive; the structured
//! zone is keyed by primary key and split between initial load and CDC
//! handling.
//!
//! A zone never aborts a streaming query on a per-batch data error;
//! only infrastructure failures propagate.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tracing::Instrument;

use inlet_core::event::{
    EventMetadata, MicroBatch, Operation, RawRecord, COMMIT_TIMESTAMP, OPERATION,
};
use inlet_core::observability::zone_span;
use inlet_core::paths::{raw_table_path, table_path};
use inlet_core::schema::{SchemaRegistry, SourceReference};
use inlet_store::{Row, TableStore};

use crate::error::Result;
use crate::merge::{is_data_failure, MergeEngine, MergeError};
use crate::metrics::{MERGE_FAILURES, MERGE_RETRIES_EXHAUSTED, VALIDATION_FAILURES};
use crate::validator::validate_record;
use crate::violations::{ViolationRouter, ViolationZone};

/// Raw archive zone: no schema enforcement, rows appended under
/// `root/source/table/operation`.
pub struct RawZone<S: TableStore + ?Sized> {
    store: Arc<S>,
    root: String,
}

impl<S: TableStore + ?Sized> RawZone<S> {
    /// Creates a raw zone rooted at `root`.
    pub fn new(store: Arc<S>, root: impl Into<String>) -> Self {
        Self {
            store,
            root: root.into(),
        }
    }

    /// Archives every record of the batch.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn process(&self, batch: &MicroBatch) -> Result<usize> {
        let mut written = 0;
        for ((source, table, operation), records) in group_by_operation(&batch.records) {
            let path = raw_table_path(&self.root, &source, &table, operation);
            let rows: Vec<Row> = records.iter().map(|r| raw_row(r)).collect();

            let work = async {
                tracing::info!(rows = rows.len(), path = %path, "appending to raw archive");
                self.store.append(&path, &rows).await?;
                self.store.refresh_manifest(&path).await
            };
            work.instrument(zone_span("raw", &source, &table)).await?;
            written += rows.len();
        }
        Ok(written)
    }
}

/// Structured-zone initial load: validate and merge `Load` rows per
/// table, idempotent under re-delivery.
pub struct StructuredZoneLoad<S: TableStore + ?Sized> {
    registry: Arc<dyn SchemaRegistry>,
    merge: Arc<MergeEngine<S>>,
    violations: Arc<ViolationRouter<S>>,
    store: Arc<S>,
    root: String,
}

impl<S: TableStore + ?Sized> StructuredZoneLoad<S> {
    /// Creates the load stage.
    pub fn new(
        registry: Arc<dyn SchemaRegistry>,
        merge: Arc<MergeEngine<S>>,
        violations: Arc<ViolationRouter<S>>,
        store: Arc<S>,
        root: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            merge,
            violations,
            store,
            root: root.into(),
        }
    }

    /// Processes every `Load` group of the batch. Returns the number of
    /// rows merged into the structured zone.
    ///
    /// # Errors
    ///
    /// Propagates storage failures; data failures divert to violations.
    pub async fn process(&self, batch: &MicroBatch) -> Result<usize> {
        let mut merged = 0;
        for ((source, table), records) in group_by_table(&batch.records, |op| op == Operation::Load)
        {
            merged += self
                .process_table(&source, &table, &records)
                .instrument(zone_span("structured-load", &source, &table))
                .await?;
        }
        Ok(merged)
    }

    async fn process_table(
        &self,
        source: &str,
        table: &str,
        records: &[&RawRecord],
    ) -> Result<usize> {
        tracing::info!(rows = records.len(), "processing load records");

        let Some(reference) = self.registry.resolve(source, table) else {
            tracing::error!("no schema found; diverting whole sub-batch");
            let reason = format!("Schema does not exist for {source}/{table}");
            let diverted: Vec<(&RawRecord, String)> =
                records.iter().map(|r| (*r, reason.clone())).collect();
            self.violations
                .divert_records(ViolationZone::StructuredLoad, source, table, &diverted)
                .await?;
            return Ok(0);
        };

        let (valid, invalid) = split_validated(&reference, records);
        metrics::counter!(VALIDATION_FAILURES, "zone" => ViolationZone::StructuredLoad.tag())
            .increment(invalid.len() as u64);

        let mut merged = 0;
        let path = table_path(&self.root, &reference.source, &reference.table);
        match self
            .merge
            .load_distinct(&path, &valid, &reference.primary_key)
            .await
        {
            Ok(()) => {
                self.store.refresh_manifest(&path).await?;
                merged = valid.len();
            }
            Err(e) => {
                handle_merge_error(
                    &self.violations,
                    ViolationZone::StructuredLoad,
                    &reference,
                    &path,
                    &valid,
                    e,
                )
                .await?;
            }
        }

        self.violations
            .divert_records(ViolationZone::StructuredLoad, source, table, &invalid)
            .await?;
        Ok(merged)
    }
}

/// Structured-zone CDC: merge insert/update/delete rows per table.
pub struct StructuredZoneCdc<S: TableStore + ?Sized> {
    merge: Arc<MergeEngine<S>>,
    violations: Arc<ViolationRouter<S>>,
    store: Arc<S>,
    root: String,
}

impl<S: TableStore + ?Sized> StructuredZoneCdc<S> {
    /// Creates the CDC stage.
    pub fn new(
        merge: Arc<MergeEngine<S>>,
        violations: Arc<ViolationRouter<S>>,
        store: Arc<S>,
        root: impl Into<String>,
    ) -> Self {
        Self {
            merge,
            violations,
            store,
            root: root.into(),
        }
    }

    /// Applies the CDC records of one table. Returns the typed rows
    /// that were merged, for downstream domain refresh; a diverted or
    /// failed batch yields no rows.
    ///
    /// # Errors
    ///
    /// Propagates storage failures only; exhausted retries divert the
    /// batch and the stream continues.
    pub async fn process(
        &self,
        reference: &SourceReference,
        records: &[&RawRecord],
    ) -> Result<Vec<Row>> {
        let cdc_records: Vec<&RawRecord> = records
            .iter()
            .copied()
            .filter(|r| r.operation.is_cdc())
            .collect();
        if cdc_records.is_empty() {
            return Ok(Vec::new());
        }

        self.process_cdc(reference, &cdc_records)
            .instrument(zone_span(
                "structured-cdc",
                &reference.source,
                &reference.table,
            ))
            .await
    }

    async fn process_cdc(
        &self,
        reference: &SourceReference,
        cdc_records: &[&RawRecord],
    ) -> Result<Vec<Row>> {
        let started = Instant::now();
        tracing::info!(rows = cdc_records.len(), "processing cdc records");

        let (valid, invalid) = split_validated(reference, cdc_records);
        metrics::counter!(VALIDATION_FAILURES, "zone" => ViolationZone::StructuredCdc.tag())
            .increment(invalid.len() as u64);
        self.violations
            .divert_records(
                ViolationZone::StructuredCdc,
                &reference.source,
                &reference.table,
                &invalid,
            )
            .await?;

        let path = table_path(&self.root, &reference.source, &reference.table);
        let merged = match self
            .merge
            .merge_cdc(&path, &valid, &reference.primary_key)
            .await
        {
            Ok(outcome) => {
                self.store.refresh_manifest(&path).await?;
                tracing::info!(
                    inserted = outcome.inserted,
                    updated = outcome.updated,
                    deleted = outcome.deleted,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "processed cdc batch"
                );
                valid
            }
            Err(e) => {
                handle_merge_error(
                    &self.violations,
                    ViolationZone::StructuredCdc,
                    reference,
                    &path,
                    &valid,
                    e,
                )
                .await?;
                Vec::new()
            }
        };
        Ok(merged)
    }
}

/// The three zones wired together for batch (load) processing.
pub struct ZonePipeline<S: TableStore + ?Sized> {
    raw: RawZone<S>,
    load: StructuredZoneLoad<S>,
}

impl<S: TableStore + ?Sized> ZonePipeline<S> {
    /// Creates the pipeline from its stages.
    pub fn new(raw: RawZone<S>, load: StructuredZoneLoad<S>) -> Self {
        Self { raw, load }
    }

    /// Processes one batch through the raw archive and the
    /// structured-zone load stage.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn process_load_batch(&self, batch: &MicroBatch) -> Result<()> {
        self.raw.process(batch).await?;
        self.load.process(batch).await?;
        Ok(())
    }
}

/// Splits records into merged-ready typed rows and per-record failures.
fn split_validated<'a>(
    reference: &SourceReference,
    records: &[&'a RawRecord],
) -> (Vec<Row>, Vec<(&'a RawRecord, String)>) {
    let mut valid = Vec::new();
    let mut invalid = Vec::new();
    for record in records {
        let outcome = validate_record(&reference.schema, record);
        if outcome.valid {
            valid.push(outcome.row);
        } else {
            invalid.push((*record, outcome.error));
        }
    }
    (valid, invalid)
}

/// Shared merge-failure policy: exhausted retries divert the batch to
/// violations with the zone tag; other data-shaped failures are logged
/// and counted; infrastructure failures propagate.
async fn handle_merge_error<S: TableStore + ?Sized>(
    violations: &ViolationRouter<S>,
    zone: ViolationZone,
    reference: &SourceReference,
    path: &str,
    rows: &[Row],
    error: MergeError,
) -> Result<()> {
    match error {
        MergeError::RetriesExhausted {
            attempts, source, ..
        } => {
            tracing::warn!(
                path,
                attempts,
                error = %source,
                "merge retries exhausted; diverting batch"
            );
            metrics::counter!(MERGE_RETRIES_EXHAUSTED, "zone" => zone.tag()).increment(1);
            violations
                .divert_rows(
                    zone,
                    &reference.source,
                    &reference.table,
                    rows,
                    &format!("merge retries exhausted: {source}"),
                )
                .await?;
            Ok(())
        }
        MergeError::Store(e) if is_data_failure(&e) => {
            tracing::error!(path, error = %e, "merge failed; batch skipped");
            metrics::counter!(MERGE_FAILURES, "zone" => zone.tag()).increment(1);
            Ok(())
        }
        MergeError::Store(e) => Err(e.into()),
    }
}

fn raw_row(record: &RawRecord) -> Row {
    let mut row = Row::new();
    row.insert("data".into(), Value::String(record.data.clone()));
    row.insert("metadata".into(), Value::String(record.metadata.clone()));
    row.insert(
        OPERATION.into(),
        Value::String(record.operation.wire_code().to_string()),
    );
    row.insert(
        COMMIT_TIMESTAMP.into(),
        Value::String(record.committed_at.to_rfc3339()),
    );
    row
}

type TableGroups<'a> = BTreeMap<(String, String), Vec<&'a RawRecord>>;
type OperationGroups<'a> = BTreeMap<(String, String, Operation), Vec<&'a RawRecord>>;

/// Groups records by `(source, table)`, keeping only those accepted by
/// the operation filter. Records with unparseable metadata are logged
/// and skipped; the event bus guarantees every event names its table.
pub(crate) fn group_by_table<'a>(
    records: &'a [RawRecord],
    accept: impl Fn(Operation) -> bool,
) -> TableGroups<'a> {
    let mut groups: TableGroups<'a> = BTreeMap::new();
    for record in records {
        if !accept(record.operation) {
            continue;
        }
        match EventMetadata::parse(&record.metadata) {
            Ok(meta) => {
                groups
                    .entry((meta.source, meta.table))
                    .or_default()
                    .push(record);
            }
            Err(e) => {
                tracing::warn!(error = %e, "skipping record with unparseable metadata");
            }
        }
    }
    groups
}

fn group_by_operation(records: &[RawRecord]) -> OperationGroups<'_> {
    let mut groups: OperationGroups<'_> = BTreeMap::new();
    for record in records {
        match EventMetadata::parse(&record.metadata) {
            Ok(meta) => {
                groups
                    .entry((meta.source, meta.table, record.operation))
                    .or_default()
                    .push(record);
            }
            Err(e) => {
                tracing::warn!(error = %e, "skipping record with unparseable metadata");
            }
        }
    }
    groups
}
