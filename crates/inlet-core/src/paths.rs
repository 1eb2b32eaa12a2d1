//! Table identifiers and zone path derivation.
//!
//! Every zone lays tables out as `root/source/table`, with an extra
//! operation segment in the raw zone. Domain tables use a
//! [`TableIdentifier`] whose database names the catalogue container,
//! schema names the source system, and table names the entity.

use crate::event::Operation;

/// Appends a trailing slash when the path lacks one.
#[must_use]
pub fn ensure_ends_with_slash(path: &str) -> String {
    if path.ends_with('/') {
        path.to_string()
    } else {
        format!("{path}/")
    }
}

/// Storage path of a structured/curated/violations table.
#[must_use]
pub fn table_path(root: &str, source: &str, table: &str) -> String {
    [root.trim_end_matches('/'), source, table].join("/")
}

/// Storage path of a raw-zone table, partitioned by operation.
#[must_use]
pub fn raw_table_path(root: &str, source: &str, table: &str, operation: Operation) -> String {
    [
        root.trim_end_matches('/'),
        source,
        table,
        operation.path_segment(),
    ]
    .join("/")
}

/// Identifies a table in the catalogue and on storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableIdentifier {
    /// User-visible catalogue container.
    pub database: String,
    /// Source system.
    pub schema: String,
    /// Entity name.
    pub table: String,
}

impl TableIdentifier {
    /// Creates a table identifier.
    #[must_use]
    pub fn new(
        database: impl Into<String>,
        schema: impl Into<String>,
        table: impl Into<String>,
    ) -> Self {
        Self {
            database: database.into(),
            schema: schema.into(),
            table: table.into(),
        }
    }

    /// Derived storage path `root/database/schema/table`.
    #[must_use]
    pub fn path(&self, root: &str) -> String {
        [
            root.trim_end_matches('/'),
            &self.database,
            &self.schema,
            &self.table,
        ]
        .join("/")
    }
}

impl std::fmt::Display for TableIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.database, self.schema, self.table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slash_is_appended_once() {
        assert_eq!(ensure_ends_with_slash("s3://bucket/prefix"), "s3://bucket/prefix/");
        assert_eq!(ensure_ends_with_slash("s3://bucket/prefix/"), "s3://bucket/prefix/");
    }

    #[test]
    fn table_paths_join_segments() {
        assert_eq!(
            table_path("s3://structured/", "oms", "offenders"),
            "s3://structured/oms/offenders"
        );
        assert_eq!(
            raw_table_path("s3://raw", "oms", "offenders", Operation::Load),
            "s3://raw/oms/offenders/load"
        );
    }

    #[test]
    fn identifier_derives_storage_path() {
        let id = TableIdentifier::new("curated", "oms", "offenders");
        assert_eq!(id.path("s3://lake/"), "s3://lake/curated/oms/offenders");
        assert_eq!(id.to_string(), "curated.oms.offenders");
    }
}
