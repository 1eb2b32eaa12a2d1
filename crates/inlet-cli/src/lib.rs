//! Command-line surface for the inlet jobs.
//!
//! Jobs consume a flat configuration bag of `--key value` pairs, the
//! way the hosting scheduler forwards parameters. The subcommand picks
//! the job; the bag configures it. The streaming CDC supervisor is a
//! library component driven by the hosting streaming engine and has no
//! CLI entry point here.

#![forbid(unsafe_code)]

pub mod commands;

use clap::{Args, Parser, Subcommand};

use inlet_core::config::{ConfigError, JobConfig};

/// Inlet pipeline jobs.
#[derive(Debug, Parser)]
#[command(name = "inlet", version, about = "CDC ingestion and table maintenance jobs")]
pub struct Cli {
    /// The job to run.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available jobs.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Build, refresh, or remove a domain table; the mode comes from
    /// the `domain.operation` parameter.
    Domain(JobArgs),
    /// Compact every table below `maintenance.root`.
    Compact(JobArgs),
    /// Vacuum every table below `maintenance.root`.
    Vacuum(JobArgs),
}

/// The flat job-parameter bag.
#[derive(Debug, Args)]
pub struct JobArgs {
    /// Job parameters as `--key value` pairs (the `--` prefix is
    /// optional).
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub params: Vec<String>,
}

impl JobArgs {
    /// Parses the parameter bag.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MalformedArguments`] when a key has no
    /// value.
    pub fn config(&self) -> Result<JobConfig, ConfigError> {
        JobConfig::from_args(self.params.iter().cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_domain_job_with_parameter_bag() {
        let cli = Cli::parse_from([
            "inlet",
            "domain",
            "--domain.name",
            "safety",
            "--domain.operation",
            "insert",
        ]);

        let Commands::Domain(args) = cli.command else {
            panic!("expected domain command");
        };
        let config = args.config().unwrap();
        assert_eq!(config.domain_name().unwrap(), "safety");
        assert_eq!(config.domain_operation().unwrap(), "insert");
    }

    #[test]
    fn maintenance_commands_parse() {
        let cli = Cli::parse_from(["inlet", "compact", "--maintenance.root", "s3://lake/structured"]);
        let Commands::Compact(args) = cli.command else {
            panic!("expected compact command");
        };
        assert_eq!(
            args.config().unwrap().maintenance_root().unwrap(),
            "s3://lake/structured"
        );
    }
}
