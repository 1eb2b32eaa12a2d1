//! Domain definitions and the refresh plan.
//!
//! A domain groups derived tables; each table names its transform
//! sources and the column serving as its primary key. Definitions are
//! loaded once per process. The fanout graph between domain tables is
//! resolved at load time into a topologically-ordered [`RefreshPlan`];
//! at runtime the refresh engine iterates the plan rather than
//! recomputing reachability per batch.

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{DomainError, Result};

/// A named set of derived tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainDefinition {
    /// Domain name.
    pub name: String,
    /// The derived tables of this domain.
    pub tables: Vec<TableDefinition>,
}

/// One derived table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableDefinition {
    /// Table name.
    pub name: String,
    /// Column produced by the transform that keys the table.
    pub primary_key: String,
    /// Optional violations path override.
    #[serde(default)]
    pub violations: Option<String>,
    /// The declarative transform producing the table.
    pub transform: TransformDefinition,
}

/// A declarative SQL transform.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformDefinition {
    /// Input tables as `source.table` names.
    pub sources: Vec<String>,
    /// The SELECT expression evaluated by the query engine.
    pub view_text: String,
}

impl DomainDefinition {
    fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(DomainError::InvalidDefinition {
                domain: self.name.clone(),
                message: "domain name is empty".into(),
            });
        }
        for table in &self.tables {
            if table.name.is_empty() {
                return Err(DomainError::InvalidDefinition {
                    domain: self.name.clone(),
                    message: "table name is empty".into(),
                });
            }
            if table.primary_key.is_empty() {
                return Err(DomainError::InvalidDefinition {
                    domain: self.name.clone(),
                    message: format!("table {} has no primary key", table.name),
                });
            }
            if table.transform.sources.is_empty() {
                return Err(DomainError::InvalidDefinition {
                    domain: self.name.clone(),
                    message: format!("table {} names no transform sources", table.name),
                });
            }
            for source in &table.transform.sources {
                if source.split('.').count() != 2 {
                    return Err(DomainError::InvalidDefinition {
                        domain: self.name.clone(),
                        message: format!(
                            "table {} has malformed source {source:?} (want source.table)",
                            table.name
                        ),
                    });
                }
            }
            if table.transform.view_text.trim().is_empty() {
                return Err(DomainError::InvalidDefinition {
                    domain: self.name.clone(),
                    message: format!("table {} has an empty transform", table.name),
                });
            }
        }
        Ok(())
    }
}

/// The domain definition catalogue loaded for one process.
#[derive(Debug, Clone, Default)]
pub struct DomainRegistry {
    definitions: Vec<DomainDefinition>,
}

impl DomainRegistry {
    /// Creates a registry from validated definitions.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::InvalidDefinition`] when any definition
    /// violates its invariants.
    pub fn from_definitions(definitions: Vec<DomainDefinition>) -> Result<Self> {
        for definition in &definitions {
            definition.validate()?;
        }
        Ok(Self { definitions })
    }

    /// Parses a registry from its JSON form (an array of definitions).
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::ParseFailure`] on malformed JSON and
    /// [`DomainError::InvalidDefinition`] on invariant violations.
    pub fn from_json(raw: &str) -> Result<Self> {
        let definitions: Vec<DomainDefinition> =
            serde_json::from_str(raw).map_err(|e| DomainError::ParseFailure {
                message: e.to_string(),
            })?;
        Self::from_definitions(definitions)
    }

    /// Definitions matching a domain name.
    #[must_use]
    pub fn get_for_name(&self, name: &str) -> Vec<&DomainDefinition> {
        self.definitions
            .iter()
            .filter(|d| d.name.eq_ignore_ascii_case(name))
            .collect()
    }

    /// All definitions.
    #[must_use]
    pub fn definitions(&self) -> &[DomainDefinition] {
        &self.definitions
    }
}

/// One node of the refresh plan.
#[derive(Debug, Clone)]
pub struct PlannedTable {
    /// Owning domain.
    pub domain: String,
    /// The table definition.
    pub table: TableDefinition,
}

impl PlannedTable {
    /// The `domain.table` key of this node.
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}.{}", self.domain, self.table.name)
    }
}

/// Topologically-ordered refresh plan over all domain tables.
#[derive(Debug, Clone, Default)]
pub struct RefreshPlan {
    ordered: Vec<PlannedTable>,
}

impl RefreshPlan {
    /// Builds the plan from a registry, ordering tables so that any
    /// domain table consumed by another is refreshed first. Cycles are
    /// rejected at load time.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::CyclicDependency`] when the dependency
    /// graph has a cycle.
    pub fn build(registry: &DomainRegistry) -> Result<Self> {
        let mut graph: DiGraph<PlannedTable, ()> = DiGraph::new();
        let mut index_by_key: HashMap<String, NodeIndex> = HashMap::new();

        for definition in registry.definitions() {
            for table in &definition.tables {
                let planned = PlannedTable {
                    domain: definition.name.clone(),
                    table: table.clone(),
                };
                let key = planned.key();
                let idx = graph.add_node(planned);
                index_by_key.insert(key, idx);
            }
        }

        // An edge producer -> consumer for every transform source that
        // is itself a domain table.
        let mut edges = Vec::new();
        for idx in graph.node_indices() {
            for source in &graph[idx].table.transform.sources {
                if let Some(&producer) = index_by_key.get(source) {
                    edges.push((producer, idx));
                }
            }
        }
        for (producer, consumer) in edges {
            graph.add_edge(producer, consumer, ());
        }

        let ordered = toposort(&graph, None)
            .map_err(|cycle| DomainError::CyclicDependency {
                node: graph[cycle.node_id()].key(),
            })?
            .into_iter()
            .map(|idx| graph[idx].clone())
            .collect();

        Ok(Self { ordered })
    }

    /// Planned tables whose transform consumes `source_table`
    /// (a `source.table` name), in refresh order.
    #[must_use]
    pub fn tables_for_source(&self, source_table: &str) -> Vec<&PlannedTable> {
        self.ordered
            .iter()
            .filter(|planned| {
                planned
                    .table
                    .transform
                    .sources
                    .iter()
                    .any(|s| s == source_table)
            })
            .collect()
    }

    /// All planned tables in refresh order.
    #[must_use]
    pub fn tables(&self) -> &[PlannedTable] {
        &self.ordered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(name: &str, sources: &[&str]) -> TableDefinition {
        TableDefinition {
            name: name.to_string(),
            primary_key: "id".to_string(),
            violations: None,
            transform: TransformDefinition {
                sources: sources.iter().map(|s| (*s).to_string()).collect(),
                view_text: format!("SELECT {}.id AS id FROM {}", sources[0], sources[0]),
            },
        }
    }

    fn registry(tables: Vec<TableDefinition>) -> DomainRegistry {
        DomainRegistry::from_definitions(vec![DomainDefinition {
            name: "safety".to_string(),
            tables,
        }])
        .unwrap()
    }

    #[test]
    fn plan_orders_producers_before_consumers() {
        let reg = registry(vec![
            table("derived", &["safety.incidents"]),
            table("incidents", &["oms.offenders"]),
        ]);
        let plan = RefreshPlan::build(&reg).unwrap();

        let keys: Vec<String> = plan.tables().iter().map(PlannedTable::key).collect();
        let incidents = keys.iter().position(|k| k == "safety.incidents").unwrap();
        let derived = keys.iter().position(|k| k == "safety.derived").unwrap();
        assert!(incidents < derived);
    }

    #[test]
    fn cycles_are_rejected_at_load() {
        let reg = registry(vec![
            table("a", &["safety.b"]),
            table("b", &["safety.a"]),
        ]);
        assert!(matches!(
            RefreshPlan::build(&reg).unwrap_err(),
            DomainError::CyclicDependency { .. }
        ));
    }

    #[test]
    fn tables_for_source_filters_by_transform_sources() {
        let reg = registry(vec![
            table("incidents", &["oms.offenders"]),
            table("locations", &["oms.agency_locations"]),
        ]);
        let plan = RefreshPlan::build(&reg).unwrap();

        let hits = plan.tables_for_source("oms.offenders");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].table.name, "incidents");
        assert!(plan.tables_for_source("oms.unknown").is_empty());
    }

    #[test]
    fn registry_parses_json_definitions() {
        let raw = r#"[{
            "name": "safety",
            "tables": [{
                "name": "incidents",
                "primaryKey": "id",
                "transform": {
                    "sources": ["oms.offenders"],
                    "viewText": "SELECT oms.offenders.id AS id FROM oms.offenders"
                }
            }]
        }]"#;
        let registry = DomainRegistry::from_json(raw).unwrap();
        assert_eq!(registry.get_for_name("safety").len(), 1);
        assert_eq!(registry.get_for_name("SAFETY").len(), 1);
    }

    #[test]
    fn malformed_sources_are_rejected() {
        let result = DomainRegistry::from_definitions(vec![DomainDefinition {
            name: "safety".to_string(),
            tables: vec![TableDefinition {
                name: "incidents".to_string(),
                primary_key: "id".to_string(),
                violations: None,
                transform: TransformDefinition {
                    sources: vec!["offenders".to_string()],
                    view_text: "SELECT 1".to_string(),
                },
            }],
        }]);
        assert!(matches!(
            result.unwrap_err(),
            DomainError::InvalidDefinition { .. }
        ));
    }
}
