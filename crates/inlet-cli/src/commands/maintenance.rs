//! Maintenance jobs: compact or vacuum every table below a root.

use std::sync::Arc;

use crate::JobArgs;
use inlet_store::{MaintenanceEngine, MemoryTableStore};

/// Runs the compaction job.
///
/// # Errors
///
/// Returns the aggregated per-table failures, if any.
pub async fn execute_compact(args: &JobArgs) -> anyhow::Result<()> {
    let (engine, root) = build(args)?;
    let report = engine.compact_all(&root).await?;
    tracing::info!(tables = report.succeeded.len(), root = %root, "compaction finished");
    Ok(())
}

/// Runs the vacuum job.
///
/// # Errors
///
/// Returns the aggregated per-table failures, if any.
pub async fn execute_vacuum(args: &JobArgs) -> anyhow::Result<()> {
    let (engine, root) = build(args)?;
    let report = engine.vacuum_all(&root).await?;
    tracing::info!(tables = report.succeeded.len(), root = %root, "vacuum finished");
    Ok(())
}

fn build(args: &JobArgs) -> anyhow::Result<(MaintenanceEngine<MemoryTableStore>, String)> {
    let config = args.config()?;
    let root = config.maintenance_root()?;

    // Production deployments bind the lakehouse TableStore behind the
    // trait; the in-memory store backs local runs.
    let store = Arc::new(MemoryTableStore::new());
    let mut engine = MaintenanceEngine::new(store, config.retry_policy()?);
    if let Some(depth_limit) = config.maintenance_depth_limit()? {
        engine = engine.with_depth_limit(depth_limit);
    }
    Ok((engine, root))
}
