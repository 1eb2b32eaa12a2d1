//! Canned schemas, references, and records.

use chrono::{DateTime, TimeZone, Utc};

use inlet_core::event::{MicroBatch, Operation, RawRecord};
use inlet_core::schema::{ColumnDef, LogicalType, PrimaryKey, SourceReference, TableSchema};

/// The offenders test schema: `id` (long, non-null), `last_name`
/// (string), `age` (integer, non-null), `birth_date` (date).
#[must_use]
pub fn offenders_schema() -> TableSchema {
    TableSchema::new(vec![
        ColumnDef::new("id", LogicalType::Long, false),
        ColumnDef::new("last_name", LogicalType::String, true),
        ColumnDef::new("age", LogicalType::Integer, false),
        ColumnDef::new("birth_date", LogicalType::Date, true),
    ])
}

/// Source reference for `oms.offenders`, keyed by `id`.
#[must_use]
pub fn offenders_reference() -> SourceReference {
    SourceReference::new(
        "SYSTEM.OFFENDERS",
        "oms",
        "offenders",
        PrimaryKey::single("id"),
        offenders_schema(),
    )
    .expect("valid reference")
}

/// A fixed commit timestamp for deterministic tests.
#[must_use]
pub fn commit_time(offset_seconds: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap() + chrono::Duration::seconds(offset_seconds)
}

/// Builds a raw record for an arbitrary table.
#[must_use]
pub fn raw_record(source: &str, table: &str, operation: Operation, data: &str) -> RawRecord {
    RawRecord {
        data: data.to_string(),
        metadata: format!(r#"{{"source":"{source}","table":"{table}"}}"#),
        operation,
        committed_at: commit_time(0),
    }
}

/// Builds an `oms.offenders` record with a conforming payload.
#[must_use]
pub fn offender_record(operation: Operation, id: i64, last_name: &str, age: i64) -> RawRecord {
    raw_record(
        "oms",
        "offenders",
        operation,
        &format!(r#"{{"id": {id}, "last_name": "{last_name}", "age": {age}}}"#),
    )
}

/// Builds a micro-batch.
#[must_use]
pub fn micro_batch(id: i64, records: Vec<RawRecord>) -> MicroBatch {
    MicroBatch::new(id, records)
}
