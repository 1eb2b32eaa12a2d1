//! Catalogue registration for domain tables.
//!
//! Derived tables are registered under
//! `database.<schema>_<table>` pointing at the table's symlink
//! manifest, classified as parquet, so external query engines can read
//! them. The catalogue itself is external; [`DomainCatalog`] is the
//! seam.

use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;

use inlet_core::paths::TableIdentifier;
use inlet_store::Row;

/// Result type alias for catalogue operations.
pub type Result<T> = std::result::Result<T, CatalogError>;

/// Accepted table names. Kept permissive (the empty string passes)
/// pending confirmation that it should be tightened.
pub const TABLE_NAME_PATTERN: &str = r"^\w*$";

/// Separator joining schema and table into the catalogue table name.
const SCHEMA_TABLE_SEPARATOR: &str = "_";

/// Manifest directory external engines consume.
const MANIFEST_DIRECTORY: &str = "_symlink_format_manifest";

fn table_name_regex() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(TABLE_NAME_PATTERN).expect("table name pattern compiles"))
}

/// Errors raised by catalogue interaction.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    /// The catalogue database does not exist.
    #[error("catalogue database {database} does not exist")]
    DatabaseMissing {
        /// The missing database.
        database: String,
    },

    /// A table with this name is already registered.
    #[error("catalogue table {name} already exists")]
    TableExists {
        /// The conflicting table name.
        name: String,
    },

    /// The table to replace is not registered.
    #[error("catalogue table {name} does not exist")]
    TableMissing {
        /// The missing table name.
        name: String,
    },

    /// The table name fails the accepted pattern.
    #[error("table name {name:?} is not supported; use [A-Za-z0-9_]")]
    InvalidTableName {
        /// The rejected name.
        name: String,
    },

    /// The catalogue backend failed.
    #[error("catalogue failure: {message}")]
    Failure {
        /// Description of the failure.
        message: String,
    },
}

/// One column of a catalogue table registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogColumn {
    /// Column name.
    pub name: String,
    /// Catalogue type name, numeric widenings applied.
    pub type_name: String,
}

/// A table registration handed to the catalogue.
#[derive(Debug, Clone)]
pub struct CatalogTableSpec {
    /// Catalogue database.
    pub database: String,
    /// Combined `<schema>_<table>` name.
    pub table_name: String,
    /// Manifest location external engines read.
    pub location: String,
    /// Columns with catalogue type names.
    pub columns: Vec<CatalogColumn>,
    /// Storage classification.
    pub classification: &'static str,
}

impl CatalogTableSpec {
    /// Builds a registration for a derived table from its storage path
    /// and a sample of its rows (the derived schema).
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::InvalidTableName`] when the combined
    /// name fails the accepted pattern.
    pub fn for_table(identifier: &TableIdentifier, path: &str, rows: &[Row]) -> Result<Self> {
        let table_name = combined_table_name(&identifier.schema, &identifier.table);
        if !table_name_regex().is_match(&table_name) {
            return Err(CatalogError::InvalidTableName { name: table_name });
        }

        Ok(Self {
            database: identifier.database.clone(),
            table_name,
            location: format!("{}/{MANIFEST_DIRECTORY}", path.trim_end_matches('/')),
            columns: infer_columns(rows),
            classification: "parquet",
        })
    }
}

/// Joins schema and table into the registered name.
#[must_use]
pub fn combined_table_name(schema: &str, table: &str) -> String {
    format!("{schema}{SCHEMA_TABLE_SEPARATOR}{table}")
}

/// Applies the explicit numeric type widenings the catalogue requires.
/// Other type names pass through unchanged.
#[must_use]
pub fn widen_type(name: &str) -> &str {
    match name {
        "long" => "bigint",
        "short" => "smallint",
        "integer" => "int",
        "byte" => "tinyint",
        other => other,
    }
}

/// Infers catalogue columns from derived rows, the way the dataframe
/// schema was inferred upstream. Unknown and null values register as
/// strings.
fn infer_columns(rows: &[Row]) -> Vec<CatalogColumn> {
    let Some(first) = rows.first() else {
        return Vec::new();
    };
    first
        .iter()
        .map(|(name, value)| {
            let type_name = match value {
                Value::Bool(_) => "boolean",
                Value::Number(n) if n.is_i64() || n.is_u64() => widen_type("long"),
                Value::Number(_) => "double",
                _ => "string",
            };
            CatalogColumn {
                name: name.clone(),
                type_name: type_name.to_string(),
            }
        })
        .collect()
}

/// The external schema catalogue.
#[async_trait]
pub trait DomainCatalog: Send + Sync {
    /// Returns whether a catalogue database exists.
    async fn database_exists(&self, database: &str) -> Result<bool>;

    /// Returns whether a table is registered.
    async fn table_exists(&self, database: &str, table_name: &str) -> Result<bool>;

    /// Registers a table.
    async fn create_table(&self, spec: &CatalogTableSpec) -> Result<()>;

    /// Removes a table registration.
    async fn delete_table(&self, database: &str, table_name: &str) -> Result<()>;
}

/// Registers a new domain table; fails when it is already registered.
///
/// # Errors
///
/// [`CatalogError::DatabaseMissing`] or [`CatalogError::TableExists`].
pub async fn create(catalog: &dyn DomainCatalog, spec: &CatalogTableSpec) -> Result<()> {
    if !catalog.database_exists(&spec.database).await? {
        return Err(CatalogError::DatabaseMissing {
            database: spec.database.clone(),
        });
    }
    if catalog.table_exists(&spec.database, &spec.table_name).await? {
        return Err(CatalogError::TableExists {
            name: spec.table_name.clone(),
        });
    }
    catalog.create_table(spec).await?;
    tracing::info!(table = %spec.table_name, database = %spec.database, "catalogue table created");
    Ok(())
}

/// Replaces an existing registration (delete then create).
///
/// # Errors
///
/// [`CatalogError::DatabaseMissing`] or [`CatalogError::TableMissing`].
pub async fn replace(catalog: &dyn DomainCatalog, spec: &CatalogTableSpec) -> Result<()> {
    if !catalog.database_exists(&spec.database).await? {
        return Err(CatalogError::DatabaseMissing {
            database: spec.database.clone(),
        });
    }
    if !catalog.table_exists(&spec.database, &spec.table_name).await? {
        return Err(CatalogError::TableMissing {
            name: spec.table_name.clone(),
        });
    }
    catalog.delete_table(&spec.database, &spec.table_name).await?;
    catalog.create_table(spec).await?;
    tracing::info!(table = %spec.table_name, database = %spec.database, "catalogue table replaced");
    Ok(())
}

/// Drops a registration; a missing table only warns.
///
/// # Errors
///
/// [`CatalogError::DatabaseMissing`] when the database is absent.
pub async fn drop_table(
    catalog: &dyn DomainCatalog,
    database: &str,
    schema: &str,
    table: &str,
) -> Result<()> {
    if !catalog.database_exists(database).await? {
        return Err(CatalogError::DatabaseMissing {
            database: database.to_string(),
        });
    }
    let table_name = combined_table_name(schema, table);
    if catalog.table_exists(database, &table_name).await? {
        catalog.delete_table(database, &table_name).await?;
        tracing::info!(table = %table_name, database, "catalogue table dropped");
    } else {
        tracing::warn!(table = %table_name, database, "catalogue table not found; nothing dropped");
    }
    Ok(())
}
