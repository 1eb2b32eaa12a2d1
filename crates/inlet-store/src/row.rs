//! Row model shared by the store and the pipeline.
//!
//! A row is an ordered `column -> value` map over JSON values. Row keys
//! are the canonical JSON encoding of the primary-key values; the
//! default map keeps keys sorted, so `serde_json::to_string` is
//! deterministic for a given value.

use serde_json::Value;

use inlet_core::schema::PrimaryKey;

use crate::error::{Result, StoreError};

/// A single table row.
pub type Row = serde_json::Map<String, Value>;

/// Canonical encoding of a row's primary-key values.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RowKey(String);

impl RowKey {
    /// The canonical encoded form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RowKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Extracts the key of `row` under `key`.
///
/// # Errors
///
/// Returns [`StoreError::MissingKeyColumn`] when a key column is absent
/// or null; keyed tables rely on every row carrying its full key.
pub fn row_key(row: &Row, key: &PrimaryKey) -> Result<RowKey> {
    let mut values = Vec::with_capacity(key.columns().len());
    for column in key.columns() {
        match row.get(column) {
            Some(value) if !value.is_null() => values.push(value),
            _ => {
                return Err(StoreError::MissingKeyColumn {
                    column: column.clone(),
                })
            }
        }
    }
    let encoded = serde_json::to_string(&values)
        .map_err(|e| StoreError::storage(format!("encode row key: {e}")))?;
    Ok(RowKey(encoded))
}

/// Builds a row from column/value pairs. Primarily for tests and
/// fixtures.
#[must_use]
pub fn row_from_pairs(pairs: &[(&str, Value)]) -> Row {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), v.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn keys_are_canonical_and_stable() {
        let key = PrimaryKey::new(vec!["id".into(), "region".into()]).unwrap();
        let a = row_from_pairs(&[("region", json!("eu")), ("id", json!(1)), ("x", json!(9))]);
        let b = row_from_pairs(&[("id", json!(1)), ("region", json!("eu"))]);

        assert_eq!(row_key(&a, &key).unwrap(), row_key(&b, &key).unwrap());
    }

    #[test]
    fn missing_key_column_is_an_error() {
        let key = PrimaryKey::single("id");
        let row = row_from_pairs(&[("name", json!("a"))]);
        assert!(matches!(
            row_key(&row, &key).unwrap_err(),
            StoreError::MissingKeyColumn { column } if column == "id"
        ));
    }

    #[test]
    fn null_key_column_is_an_error() {
        let key = PrimaryKey::single("id");
        let row = row_from_pairs(&[("id", Value::Null)]);
        assert!(row_key(&row, &key).is_err());
    }

    #[test]
    fn distinct_values_produce_distinct_keys() {
        let key = PrimaryKey::single("id");
        let a = row_from_pairs(&[("id", json!(1))]);
        let b = row_from_pairs(&[("id", json!("1"))]);
        assert_ne!(row_key(&a, &key).unwrap(), row_key(&b, &key).unwrap());
    }
}
