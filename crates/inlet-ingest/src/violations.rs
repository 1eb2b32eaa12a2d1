//! Violation routing.
//!
//! Rows that fail validation, or batches that cannot be applied after
//! exhausted retries, are diverted to a parallel violations zone rather
//! than lost or silently dropped. Each diverted row carries an `error`
//! column with the reason and a `zone` column naming the pipeline stage
//! that rejected it.

use std::sync::Arc;

use serde_json::Value;

use inlet_core::event::{RawRecord, COMMIT_TIMESTAMP, ERROR, OPERATION, ZONE};
use inlet_core::paths::table_path;
use inlet_store::{Row, StoreError, TableStore};

use crate::metrics::VIOLATION_ROWS;

/// The pipeline stage a violation was diverted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationZone {
    /// Raw archive writes.
    Raw,
    /// Structured-zone initial load.
    StructuredLoad,
    /// Structured-zone CDC merge.
    StructuredCdc,
    /// Domain refresh.
    Domain,
}

impl ViolationZone {
    /// The tag recorded in the `zone` column.
    #[must_use]
    pub fn tag(self) -> &'static str {
        match self {
            ViolationZone::Raw => "RAW",
            ViolationZone::StructuredLoad => "STRUCTURED_LOAD",
            ViolationZone::StructuredCdc => "STRUCTURED_CDC",
            ViolationZone::Domain => "DOMAIN",
        }
    }
}

impl std::fmt::Display for ViolationZone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

/// Writes rejected rows to the violations zone.
pub struct ViolationRouter<S: TableStore + ?Sized> {
    store: Arc<S>,
    root: String,
}

impl<S: TableStore + ?Sized> ViolationRouter<S> {
    /// Creates a router writing under `root`.
    pub fn new(store: Arc<S>, root: impl Into<String>) -> Self {
        Self {
            store,
            root: root.into(),
        }
    }

    /// Diverts raw records with a per-record reason.
    ///
    /// The written row keeps the undecoded `data` and `metadata`
    /// payloads so nothing is lost.
    ///
    /// # Errors
    ///
    /// Propagates storage failures; those are infrastructure, not data.
    pub async fn divert_records(
        &self,
        zone: ViolationZone,
        source: &str,
        table: &str,
        records: &[(&RawRecord, String)],
    ) -> Result<(), StoreError> {
        let rows: Vec<Row> = records
            .iter()
            .map(|(record, error)| {
                let mut row = Row::new();
                row.insert("data".into(), Value::String(record.data.clone()));
                row.insert("metadata".into(), Value::String(record.metadata.clone()));
                row.insert(ERROR.into(), Value::String(error.clone()));
                row.insert(ZONE.into(), Value::String(zone.tag().to_string()));
                row
            })
            .collect();
        self.write(zone, source, table, rows).await
    }

    /// Diverts already-typed rows (an exhausted CDC batch) with a
    /// uniform reason. Bookkeeping columns are dropped.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn divert_rows(
        &self,
        zone: ViolationZone,
        source: &str,
        table: &str,
        rows: &[Row],
        reason: &str,
    ) -> Result<(), StoreError> {
        let rows: Vec<Row> = rows
            .iter()
            .map(|row| {
                let mut out: Row = row
                    .iter()
                    .filter(|(column, _)| {
                        column.as_str() != OPERATION && column.as_str() != COMMIT_TIMESTAMP
                    })
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                out.insert(ERROR.into(), Value::String(reason.to_string()));
                out.insert(ZONE.into(), Value::String(zone.tag().to_string()));
                out
            })
            .collect();
        self.write(zone, source, table, rows).await
    }

    async fn write(
        &self,
        zone: ViolationZone,
        source: &str,
        table: &str,
        rows: Vec<Row>,
    ) -> Result<(), StoreError> {
        if rows.is_empty() {
            return Ok(());
        }

        let path = table_path(&self.root, source, table);
        tracing::error!(
            zone = %zone,
            source,
            table,
            rows = rows.len(),
            path = %path,
            "diverting rows to the violations zone"
        );

        self.store.append(&path, &rows).await?;
        self.store.refresh_manifest(&path).await?;
        metrics::counter!(VIOLATION_ROWS, "zone" => zone.tag()).increment(rows.len() as u64);
        Ok(())
    }
}
