//! Schema validation for raw CDC payloads.
//!
//! Validation runs *after* the payload has been projected through the
//! schema, because the projection deliberately behaves like the
//! upstream parser: it silently nullifies both missing fields and
//! fields whose values do not match the declared type. Equality between
//! the projected payload and the (idiosyncrasy-normalised) raw payload
//! is therefore the only reliable oracle for "this row conforms".
//!
//! The checks, in order:
//!
//! 1. the raw payload must parse as a JSON object;
//! 2. the raw and projected payloads must be equal once nulls are
//!    stripped from both sides (a difference indicates a bad value,
//!    e.g. a string where a number was expected, or an undeclared
//!    field);
//! 3. every field declared non-nullable must have a value.
//!
//! The validator is pure and deterministic per `(schema, row)`.

use serde_json::Value;

use inlet_core::event::{RawRecord, COMMIT_TIMESTAMP, OPERATION};
use inlet_core::schema::{LogicalType, TableSchema};
use inlet_store::Row;

/// A raw record annotated with its validation outcome.
#[derive(Debug, Clone)]
pub struct ValidatedRecord {
    /// The payload projected through the schema, with the operation
    /// code and commit timestamp appended as bookkeeping columns.
    pub row: Row,
    /// Whether the record passed validation.
    pub valid: bool,
    /// Failure detail; empty for valid records.
    pub error: String,
}

/// Validates one raw record against a table schema.
#[must_use]
pub fn validate_record(schema: &TableSchema, record: &RawRecord) -> ValidatedRecord {
    let raw_map = match parse_object(&record.data) {
        Ok(map) => map,
        Err(detail) => {
            return ValidatedRecord {
                row: bookkeeping_row(Row::new(), record),
                valid: false,
                error: format!("parse failure: {detail}"),
            }
        }
    };

    let projected = project(schema, &raw_map);
    let filtered_raw = source_filter(schema, &raw_map);

    let differences = difference_keys(&strip_nulls(&filtered_raw), &strip_nulls(&projected));
    if !differences.is_empty() {
        return ValidatedRecord {
            row: bookkeeping_row(projected, record),
            valid: false,
            error: format!(
                "payload does not match schema; differing fields: {}",
                differences.join(", ")
            ),
        };
    }

    for column in schema.non_nullable_columns() {
        let is_null = raw_map
            .get(&column.name)
            .map_or(true, serde_json::Value::is_null);
        if is_null {
            return ValidatedRecord {
                row: bookkeeping_row(projected, record),
                valid: false,
                error: format!("non-null field {} is null", column.name),
            };
        }
    }

    ValidatedRecord {
        row: bookkeeping_row(projected, record),
        valid: true,
        error: String::new(),
    }
}

/// Projects a raw payload through the schema the way the upstream
/// parser does: declared columns only, values coerced, mismatches
/// nullified.
fn project(schema: &TableSchema, raw: &Row) -> Row {
    schema
        .columns
        .iter()
        .map(|column| {
            let value = raw
                .get(&column.name)
                .map_or(Value::Null, |v| column.data_type.coerce(v));
            (column.name.clone(), value)
        })
        .collect()
}

/// Normalises known idiosyncrasies of the upstream replicator in the
/// raw payload so the equality check compares like with like. Currently
/// this is the zero-time ISO-8601 timestamp the replicator emits for
/// date columns, collapsed to the date part.
fn source_filter(schema: &TableSchema, raw: &Row) -> Row {
    raw.iter()
        .map(|(name, value)| {
            let normalised = match schema.column(name) {
                Some(column) if column.data_type == LogicalType::Date => {
                    match (value, column.data_type.coerce(value)) {
                        (Value::String(_), Value::String(date)) => Value::String(date),
                        _ => value.clone(),
                    }
                }
                _ => value.clone(),
            };
            (name.clone(), normalised)
        })
        .collect()
}

fn parse_object(data: &str) -> Result<Row, String> {
    match serde_json::from_str::<Value>(data) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err("payload is not an object".to_string()),
        Err(e) => Err(e.to_string()),
    }
}

fn strip_nulls(map: &Row) -> Row {
    map.iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Keys whose values differ between the two maps, in sorted order.
/// Null fields are treated the same as missing fields.
fn difference_keys(lhs: &Row, rhs: &Row) -> Vec<String> {
    let mut keys: Vec<String> = lhs
        .keys()
        .chain(rhs.keys())
        .filter(|k| lhs.get(*k) != rhs.get(*k))
        .cloned()
        .collect();
    keys.sort();
    keys.dedup();
    keys
}

/// Appends the operation code and commit timestamp to a projected row.
fn bookkeeping_row(mut row: Row, record: &RawRecord) -> Row {
    row.insert(
        OPERATION.to_string(),
        Value::String(record.operation.wire_code().to_string()),
    );
    row.insert(
        COMMIT_TIMESTAMP.to_string(),
        Value::String(record.committed_at.to_rfc3339()),
    );
    row
}
