//! Inlet CLI - job entry points for the CDC pipeline.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use inlet_cli::{Cli, Commands};

fn main() -> Result<()> {
    // Jobs run under a scheduler that captures stdout; RUST_LOG
    // overrides the default level.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        match cli.command {
            Commands::Domain(args) => inlet_cli::commands::domain::execute(&args).await,
            Commands::Compact(args) => {
                inlet_cli::commands::maintenance::execute_compact(&args).await
            }
            Commands::Vacuum(args) => inlet_cli::commands::maintenance::execute_vacuum(&args).await,
        }
    })
}
