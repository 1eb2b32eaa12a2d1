//! Built-in projection query engine.
//!
//! The transform seam is [`QueryEngine`]; production deployments bind a
//! full SQL engine behind it. This built-in engine evaluates the
//! projection subset of the transform language and backs local runs and
//! tests.

use async_trait::async_trait;
use serde_json::Value;

use crate::engine::{QueryEngine, QueryError, QueryInput};
use inlet_store::Row;

/// Evaluates transforms of the shape
/// `SELECT <input>.<column> AS <alias>, ... FROM <input>` by
/// projecting columns off the named input.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProjectionQueryEngine;

impl ProjectionQueryEngine {
    /// Creates the engine.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl QueryEngine for ProjectionQueryEngine {
    async fn evaluate(
        &self,
        inputs: &[QueryInput],
        view_text: &str,
    ) -> Result<Vec<Row>, QueryError> {
        let (projections, source_name) = parse_select(view_text)?;

        let input = inputs
            .iter()
            .find(|i| i.name == source_name)
            .ok_or_else(|| QueryError::Evaluation {
                message: format!("unknown input table {source_name}"),
            })?;

        let rows = input
            .rows
            .iter()
            .map(|row| {
                projections
                    .iter()
                    .map(|(column, alias)| {
                        let value = row.get(column).cloned().unwrap_or(Value::Null);
                        (alias.clone(), value)
                    })
                    .collect()
            })
            .collect();
        Ok(rows)
    }
}

type Projection = (String, String);

fn parse_select(view_text: &str) -> Result<(Vec<Projection>, String), QueryError> {
    let text = view_text.trim();
    let lowered = text.to_ascii_lowercase();

    let body = lowered
        .strip_prefix("select ")
        .map(|_| &text[7..])
        .ok_or_else(|| evaluation_error(view_text, "expected SELECT"))?;

    let from_at = body
        .to_ascii_lowercase()
        .rfind(" from ")
        .ok_or_else(|| evaluation_error(view_text, "expected FROM"))?;
    let (projection_list, from_clause) = body.split_at(from_at);
    let source_name = from_clause[6..].trim().to_string();

    let mut projections = Vec::new();
    for item in projection_list.split(',') {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }

        let (expression, alias) = match item.to_ascii_lowercase().rfind(" as ") {
            Some(at) => (item[..at].trim(), item[at + 4..].trim().to_string()),
            None => (item, String::new()),
        };

        // The expression is a column qualified by the input name.
        let column = expression
            .strip_prefix(&format!("{source_name}."))
            .unwrap_or_else(|| expression.rsplit('.').next().unwrap_or(expression))
            .to_string();
        let alias = if alias.is_empty() {
            column.clone()
        } else {
            alias
        };
        projections.push((column, alias));
    }

    if projections.is_empty() {
        return Err(evaluation_error(view_text, "no projections"));
    }
    Ok((projections, source_name))
}

fn evaluation_error(view_text: &str, message: &str) -> QueryError {
    QueryError::Evaluation {
        message: format!("{message} in {view_text:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inlet_store::row_from_pairs;
    use serde_json::json;

    #[tokio::test]
    async fn projects_aliased_columns() {
        let engine = ProjectionQueryEngine::new();
        let inputs = vec![QueryInput {
            name: "oms.offenders".to_string(),
            rows: vec![row_from_pairs(&[
                ("id", json!(1)),
                ("last_name", json!("Smith")),
                ("noise", json!("x")),
            ])],
        }];

        let derived = engine
            .evaluate(
                &inputs,
                "SELECT oms.offenders.id AS id, oms.offenders.last_name AS last_name FROM oms.offenders",
            )
            .await
            .unwrap();

        assert_eq!(derived.len(), 1);
        assert_eq!(derived[0].get("id"), Some(&json!(1)));
        assert_eq!(derived[0].get("last_name"), Some(&json!("Smith")));
        assert!(!derived[0].contains_key("noise"));
    }

    #[tokio::test]
    async fn unknown_input_is_an_error() {
        let engine = ProjectionQueryEngine::new();
        let err = engine
            .evaluate(&[], "SELECT a.b.c FROM a.b")
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::Evaluation { .. }));
    }
}
