//! Source table schemas and the schema registry interface.
//!
//! A [`SourceReference`] describes one replicated table: its source
//! system, table name, primary key, and column schema. References are
//! loaded once per process from the schema catalogue and are read-only
//! for the life of a streaming query; tests supply a fake registry.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Result type alias for schema operations.
pub type Result<T> = std::result::Result<T, SchemaError>;

/// Errors raised while building schema objects.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    /// A logical type name was not recognised.
    #[error("unknown logical type: {name}")]
    UnknownType {
        /// The unrecognised type name.
        name: String,
    },

    /// A source reference violated a structural invariant.
    #[error("invalid source reference {reference}: {message}")]
    InvalidReference {
        /// The reference's fully qualified name.
        reference: String,
        /// Description of the violation.
        message: String,
    },
}

/// The closed set of column types the pipeline understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogicalType {
    /// UTF-8 string.
    String,
    /// Boolean.
    Boolean,
    /// 64-bit signed integer.
    Long,
    /// 32-bit signed integer.
    Integer,
    /// 16-bit signed integer.
    Short,
    /// 8-bit signed integer.
    Byte,
    /// 32-bit float.
    Float,
    /// 64-bit float.
    Double,
    /// Calendar date, `YYYY-MM-DD`.
    Date,
    /// Instant, ISO-8601.
    Timestamp,
}

impl LogicalType {
    /// The columnar type name, as it appears in the schema catalogue.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            LogicalType::String => "string",
            LogicalType::Boolean => "boolean",
            LogicalType::Long => "long",
            LogicalType::Integer => "integer",
            LogicalType::Short => "short",
            LogicalType::Byte => "byte",
            LogicalType::Float => "float",
            LogicalType::Double => "double",
            LogicalType::Date => "date",
            LogicalType::Timestamp => "timestamp",
        }
    }

    /// Parses a catalogue type name.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::UnknownType`] for unrecognised names.
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "string" => Ok(LogicalType::String),
            "boolean" => Ok(LogicalType::Boolean),
            "long" => Ok(LogicalType::Long),
            "integer" => Ok(LogicalType::Integer),
            "short" => Ok(LogicalType::Short),
            "byte" => Ok(LogicalType::Byte),
            "float" => Ok(LogicalType::Float),
            "double" => Ok(LogicalType::Double),
            "date" => Ok(LogicalType::Date),
            "timestamp" => Ok(LogicalType::Timestamp),
            other => Err(SchemaError::UnknownType {
                name: other.to_string(),
            }),
        }
    }

    /// Coerces a raw JSON value to this type the way the upstream
    /// parser does: a conforming value is normalised, anything else is
    /// silently nullified.
    #[must_use]
    pub fn coerce(self, value: &Value) -> Value {
        match (self, value) {
            (_, Value::Null) => Value::Null,
            (LogicalType::String, Value::String(_)) => value.clone(),
            (LogicalType::Boolean, Value::Bool(_)) => value.clone(),
            (LogicalType::Long, Value::Number(n)) => {
                n.as_i64().map_or(Value::Null, |v| Value::Number(v.into()))
            }
            (LogicalType::Integer, Value::Number(n)) => n
                .as_i64()
                .filter(|v| i32::try_from(*v).is_ok())
                .map_or(Value::Null, |v| Value::Number(v.into())),
            (LogicalType::Short, Value::Number(n)) => n
                .as_i64()
                .filter(|v| i16::try_from(*v).is_ok())
                .map_or(Value::Null, |v| Value::Number(v.into())),
            (LogicalType::Byte, Value::Number(n)) => n
                .as_i64()
                .filter(|v| i8::try_from(*v).is_ok())
                .map_or(Value::Null, |v| Value::Number(v.into())),
            (LogicalType::Float | LogicalType::Double, Value::Number(n)) => n
                .as_f64()
                .and_then(serde_json::Number::from_f64)
                .map_or(Value::Null, Value::Number),
            (LogicalType::Date, Value::String(s)) => {
                date_value(s).map_or(Value::Null, Value::String)
            }
            (LogicalType::Timestamp, Value::String(s)) => {
                if chrono::DateTime::parse_from_rfc3339(s).is_ok() {
                    value.clone()
                } else {
                    Value::Null
                }
            }
            _ => Value::Null,
        }
    }
}

/// Accepts a plain date, or a zero-time ISO-8601 timestamp which the
/// upstream replicator emits for date columns; both collapse to the
/// date part.
fn date_value(raw: &str) -> Option<String> {
    if chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d").is_ok() {
        return Some(raw.to_string());
    }
    let ts = chrono::DateTime::parse_from_rfc3339(raw).ok()?;
    use chrono::Timelike;
    let time = ts.time();
    if time.hour() == 0 && time.minute() == 0 && time.second() == 0 && time.nanosecond() == 0 {
        Some(ts.date_naive().format("%Y-%m-%d").to_string())
    } else {
        None
    }
}

/// One column of a source table schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    /// Column name.
    pub name: String,
    /// Logical type.
    #[serde(rename = "type")]
    pub data_type: LogicalType,
    /// Whether null values are permitted.
    pub nullable: bool,
}

impl ColumnDef {
    /// Creates a column definition.
    #[must_use]
    pub fn new(name: impl Into<String>, data_type: LogicalType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable,
        }
    }
}

/// An ordered list of column definitions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    /// The columns, in declaration order.
    pub columns: Vec<ColumnDef>,
}

impl TableSchema {
    /// Creates a schema from columns.
    #[must_use]
    pub fn new(columns: Vec<ColumnDef>) -> Self {
        Self { columns }
    }

    /// Looks up a column by name.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Column names in declaration order.
    #[must_use]
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Columns declared non-nullable.
    #[must_use]
    pub fn non_nullable_columns(&self) -> Vec<&ColumnDef> {
        self.columns.iter().filter(|c| !c.nullable).collect()
    }
}

/// An ordered, non-empty list of primary-key column names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimaryKey(Vec<String>);

impl PrimaryKey {
    /// Creates a primary key.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::InvalidReference`] when no columns are
    /// given.
    pub fn new(columns: Vec<String>) -> Result<Self> {
        if columns.is_empty() {
            return Err(SchemaError::InvalidReference {
                reference: String::new(),
                message: "primary key must name at least one column".into(),
            });
        }
        Ok(Self(columns))
    }

    /// Convenience constructor for a single-column key.
    #[must_use]
    pub fn single(column: impl Into<String>) -> Self {
        Self(vec![column.into()])
    }

    /// The key columns, in order.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.0
    }
}

/// A registered source table.
///
/// Immutable after registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceReference {
    /// Fully qualified name in the upstream system.
    pub fully_qualified_name: String,
    /// Source system name.
    pub source: String,
    /// Table name.
    pub table: String,
    /// Primary key columns.
    pub primary_key: PrimaryKey,
    /// Column schema.
    pub schema: TableSchema,
}

impl SourceReference {
    /// Creates a source reference, validating that every primary-key
    /// column exists in the schema and is non-nullable.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::InvalidReference`] on violation.
    pub fn new(
        fully_qualified_name: impl Into<String>,
        source: impl Into<String>,
        table: impl Into<String>,
        primary_key: PrimaryKey,
        schema: TableSchema,
    ) -> Result<Self> {
        let fully_qualified_name = fully_qualified_name.into();

        for key_column in primary_key.columns() {
            match schema.column(key_column) {
                None => {
                    return Err(SchemaError::InvalidReference {
                        reference: fully_qualified_name,
                        message: format!("primary key column {key_column} is not in the schema"),
                    })
                }
                Some(column) if column.nullable => {
                    return Err(SchemaError::InvalidReference {
                        reference: fully_qualified_name,
                        message: format!("primary key column {key_column} is nullable"),
                    })
                }
                Some(_) => {}
            }
        }

        Ok(Self {
            fully_qualified_name,
            source: source.into(),
            table: table.into(),
            primary_key,
            schema,
        })
    }
}

/// Resolves `(source, table)` pairs to registered source references.
///
/// Implementations must be immutable after initialisation; lookups are
/// called from every micro-batch.
pub trait SchemaRegistry: Send + Sync {
    /// Resolves a source reference, or `None` when the pair is not
    /// registered.
    fn resolve(&self, source: &str, table: &str) -> Option<SourceReference>;
}

/// Init-time-populated registry backed by a map.
#[derive(Debug, Default)]
pub struct InMemorySchemaRegistry {
    sources: std::collections::HashMap<String, SourceReference>,
}

impl InMemorySchemaRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a source reference under its lowercased
    /// `source.table` key.
    pub fn register(&mut self, reference: SourceReference) {
        let key = registry_key(&reference.source, &reference.table);
        self.sources.insert(key, reference);
    }

    /// Builder-style registration.
    #[must_use]
    pub fn with(mut self, reference: SourceReference) -> Self {
        self.register(reference);
        self
    }

    /// All registered references.
    #[must_use]
    pub fn references(&self) -> Vec<&SourceReference> {
        self.sources.values().collect()
    }
}

impl SchemaRegistry for InMemorySchemaRegistry {
    fn resolve(&self, source: &str, table: &str) -> Option<SourceReference> {
        self.sources.get(&registry_key(source, table)).cloned()
    }
}

fn registry_key(source: &str, table: &str) -> String {
    format!("{source}.{table}").to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> TableSchema {
        TableSchema::new(vec![
            ColumnDef::new("id", LogicalType::Long, false),
            ColumnDef::new("name", LogicalType::String, true),
        ])
    }

    #[test]
    fn reference_requires_known_key_columns() {
        let err = SourceReference::new(
            "SYSTEM.OFFENDERS",
            "oms",
            "offenders",
            PrimaryKey::single("missing"),
            schema(),
        )
        .unwrap_err();
        assert!(matches!(err, SchemaError::InvalidReference { .. }));
    }

    #[test]
    fn reference_rejects_nullable_key_columns() {
        let err = SourceReference::new(
            "SYSTEM.OFFENDERS",
            "oms",
            "offenders",
            PrimaryKey::single("name"),
            schema(),
        )
        .unwrap_err();
        assert!(matches!(err, SchemaError::InvalidReference { .. }));
    }

    #[test]
    fn registry_lookup_is_case_insensitive() {
        let reference = SourceReference::new(
            "SYSTEM.OFFENDERS",
            "OMS",
            "Offenders",
            PrimaryKey::single("id"),
            schema(),
        )
        .unwrap();
        let registry = InMemorySchemaRegistry::new().with(reference);

        assert!(registry.resolve("oms", "offenders").is_some());
        assert!(registry.resolve("OMS", "OFFENDERS").is_some());
        assert!(registry.resolve("oms", "bookings").is_none());
    }

    #[test]
    fn coerce_nullifies_type_mismatches() {
        assert_eq!(LogicalType::Long.coerce(&json!("abc")), Value::Null);
        assert_eq!(LogicalType::Long.coerce(&json!(7)), json!(7));
        assert_eq!(LogicalType::String.coerce(&json!(7)), Value::Null);
        assert_eq!(LogicalType::Boolean.coerce(&json!(true)), json!(true));
    }

    #[test]
    fn coerce_enforces_integer_ranges() {
        assert_eq!(LogicalType::Byte.coerce(&json!(127)), json!(127));
        assert_eq!(LogicalType::Byte.coerce(&json!(128)), Value::Null);
        assert_eq!(LogicalType::Short.coerce(&json!(40_000)), Value::Null);
        assert_eq!(LogicalType::Integer.coerce(&json!(1i64 << 40)), Value::Null);
    }

    #[test]
    fn zero_time_timestamp_collapses_to_date() {
        assert_eq!(
            LogicalType::Date.coerce(&json!("2023-05-01T00:00:00Z")),
            json!("2023-05-01")
        );
        assert_eq!(
            LogicalType::Date.coerce(&json!("2023-05-01")),
            json!("2023-05-01")
        );
        assert_eq!(
            LogicalType::Date.coerce(&json!("2023-05-01T10:30:00Z")),
            Value::Null
        );
    }

    #[test]
    fn type_names_round_trip() {
        for ty in [
            LogicalType::String,
            LogicalType::Boolean,
            LogicalType::Long,
            LogicalType::Integer,
            LogicalType::Short,
            LogicalType::Byte,
            LogicalType::Float,
            LogicalType::Double,
            LogicalType::Date,
            LogicalType::Timestamp,
        ] {
            assert_eq!(LogicalType::parse(ty.name()).unwrap(), ty);
        }
        assert!(LogicalType::parse("decimal").is_err());
    }
}
