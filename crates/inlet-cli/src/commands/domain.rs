//! The domain job: build, refresh, or remove one domain table.

use std::sync::Arc;

use anyhow::Context;

use crate::JobArgs;
use inlet_domain::{
    DomainOperation, DomainRefreshEngine, DomainRegistry, ProjectionQueryEngine, RefreshPlan,
};
use inlet_ingest::MergeEngine;
use inlet_store::MemoryTableStore;

/// Runs the domain job.
///
/// # Errors
///
/// Fails fast on missing mandatory parameters; otherwise returns the
/// refresh engine's aggregated error.
pub async fn execute(args: &JobArgs) -> anyhow::Result<()> {
    let config = args.config()?;

    let registry_location = config.domain_registry()?;
    let raw = std::fs::read_to_string(&registry_location)
        .with_context(|| format!("reading domain registry {registry_location}"))?;
    let registry = DomainRegistry::from_json(&raw)?;
    let plan = RefreshPlan::build(&registry)?;

    let domain_name = config.domain_name()?;
    let table_name = config.domain_table_name()?;
    let operation = DomainOperation::parse(&config.domain_operation()?)?;

    if let Some(database) = config.catalog_database() {
        // The catalogue client binds at deployment time; local runs
        // skip registration.
        tracing::warn!(database, "no catalogue backend bound; skipping registration");
    }

    // Production deployments bind the lakehouse TableStore behind the
    // trait; the in-memory store backs local runs.
    let store = Arc::new(MemoryTableStore::new());
    let merge = Arc::new(MergeEngine::new(store.clone(), config.retry_policy()?));
    let engine = DomainRefreshEngine::new(
        store,
        Arc::new(ProjectionQueryEngine::new()),
        merge,
        plan,
        config.domain_target_path()?,
        config.curated_path()?,
    );

    tracing::info!(
        domain = %domain_name,
        table = %table_name,
        operation = ?operation,
        "running domain job"
    );
    engine
        .run(&registry, &domain_name, &table_name, operation)
        .await?;
    Ok(())
}
