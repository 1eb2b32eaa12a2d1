//! In-memory schema catalogue.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use inlet_domain::{CatalogError, CatalogTableSpec, DomainCatalog};

/// In-memory catalogue with pre-created databases.
#[derive(Default)]
pub struct MemoryCatalog {
    databases: HashSet<String>,
    tables: Mutex<HashMap<String, CatalogTableSpec>>,
}

impl MemoryCatalog {
    /// Creates a catalogue containing the given databases.
    #[must_use]
    pub fn with_databases(databases: &[&str]) -> Self {
        Self {
            databases: databases.iter().map(|d| (*d).to_string()).collect(),
            tables: Mutex::new(HashMap::new()),
        }
    }

    /// Looks up a registered table, for assertions.
    #[must_use]
    pub fn table(&self, database: &str, table_name: &str) -> Option<CatalogTableSpec> {
        self.tables
            .lock()
            .expect("catalog lock")
            .get(&key(database, table_name))
            .cloned()
    }
}

fn key(database: &str, table_name: &str) -> String {
    format!("{database}:{table_name}")
}

#[async_trait]
impl DomainCatalog for MemoryCatalog {
    async fn database_exists(&self, database: &str) -> Result<bool, CatalogError> {
        Ok(self.databases.contains(database))
    }

    async fn table_exists(&self, database: &str, table_name: &str) -> Result<bool, CatalogError> {
        Ok(self
            .tables
            .lock()
            .expect("catalog lock")
            .contains_key(&key(database, table_name)))
    }

    async fn create_table(&self, spec: &CatalogTableSpec) -> Result<(), CatalogError> {
        self.tables
            .lock()
            .expect("catalog lock")
            .insert(key(&spec.database, &spec.table_name), spec.clone());
        Ok(())
    }

    async fn delete_table(&self, database: &str, table_name: &str) -> Result<(), CatalogError> {
        self.tables
            .lock()
            .expect("catalog lock")
            .remove(&key(database, table_name));
        Ok(())
    }
}
