//! Typed access to the flat job-parameter bag.
//!
//! Jobs receive their parameters as `--key value` pairs, consistent
//! with how the hosting scheduler forwards arguments. The leading `--`
//! is stripped on ingress so that code handling parameters can refer to
//! them by bare key. Mandatory keys fail fast with an explicit
//! missing-key error; optional keys return an absent value.

use std::collections::HashMap;
use std::time::Duration;

use crate::retry::{
    RetryPolicy, DEFAULT_JITTER_FACTOR, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_WAIT, DEFAULT_MIN_WAIT,
};

/// Result type alias for configuration access.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors raised while reading job parameters.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A mandatory key is absent.
    #[error("job parameter {key} is not set")]
    Missing {
        /// The missing key.
        key: String,
    },

    /// A key is present but its value cannot be interpreted.
    #[error("job parameter {key} has invalid value {value:?}: {message}")]
    Invalid {
        /// The offending key.
        key: String,
        /// The raw value.
        value: String,
        /// Description of the problem.
        message: String,
    },

    /// The raw argument list was malformed.
    #[error("malformed job arguments: {message}")]
    MalformedArguments {
        /// Description of the problem.
        message: String,
    },
}

/// Typed view over the flat key/value configuration bag.
#[derive(Debug, Clone)]
pub struct JobConfig {
    params: HashMap<String, String>,
}

impl JobConfig {
    /// Creates a config view, stripping any leading `--` from keys.
    #[must_use]
    pub fn new(params: HashMap<String, String>) -> Self {
        let params = params
            .into_iter()
            .map(|(k, v)| (clean_key(&k), v))
            .collect();
        Self { params }
    }

    /// Parses an alternating `--key value` argument list.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MalformedArguments`] when a key has no
    /// value.
    pub fn from_args<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut params = HashMap::new();
        let mut iter = args.into_iter().map(Into::into);
        while let Some(key) = iter.next() {
            let value = iter.next().ok_or_else(|| ConfigError::MalformedArguments {
                message: format!("no value supplied for parameter {key}"),
            })?;
            params.insert(clean_key(&key), value);
        }
        Ok(Self { params })
    }

    /// Target AWS region.
    pub fn aws_region(&self) -> Result<String> {
        self.mandatory("aws.region")
    }

    /// Endpoint URL for the event-source binding.
    pub fn kinesis_endpoint_url(&self) -> Result<String> {
        self.mandatory("aws.kinesis.endpointUrl")
    }

    /// Name of the event stream to read.
    pub fn kinesis_stream_name(&self) -> Result<String> {
        self.mandatory("kinesis.reader.streamName")
    }

    /// Micro-batch tick duration.
    pub fn batch_duration(&self) -> Result<Duration> {
        let key = "kinesis.reader.batchDurationSeconds";
        let raw = self.mandatory(key)?;
        let seconds = raw.parse::<u64>().map_err(|e| ConfigError::Invalid {
            key: key.into(),
            value: raw.clone(),
            message: e.to_string(),
        })?;
        Ok(Duration::from_secs(seconds))
    }

    /// Raw zone root path.
    #[must_use]
    pub fn raw_path(&self) -> Option<String> {
        self.optional("raw.s3.path")
    }

    /// Structured zone root path.
    #[must_use]
    pub fn structured_path(&self) -> Option<String> {
        self.optional("structured.s3.path")
    }

    /// Violations zone root path.
    #[must_use]
    pub fn violations_path(&self) -> Option<String> {
        self.optional("violations.s3.path")
    }

    /// Curated zone root path.
    pub fn curated_path(&self) -> Result<String> {
        self.mandatory("curated.s3.path")
    }

    /// Domain zone target root path.
    pub fn domain_target_path(&self) -> Result<String> {
        self.mandatory("domain.target.path")
    }

    /// Name of the domain a domain job operates on.
    pub fn domain_name(&self) -> Result<String> {
        self.mandatory("domain.name")
    }

    /// Name of the domain table a domain job operates on.
    pub fn domain_table_name(&self) -> Result<String> {
        self.mandatory("domain.table.name")
    }

    /// Location of the domain definition registry.
    pub fn domain_registry(&self) -> Result<String> {
        self.mandatory("domain.registry")
    }

    /// Operation a domain job performs (`insert`, `update`, `delete`).
    pub fn domain_operation(&self) -> Result<String> {
        self.mandatory("domain.operation")
    }

    /// Catalogue database domain tables are registered under.
    #[must_use]
    pub fn catalog_database(&self) -> Option<String> {
        self.optional("domain.catalog.db")
    }

    /// Streaming checkpoint root.
    pub fn checkpoint_location(&self) -> Result<String> {
        self.mandatory("checkpoint.location")
    }

    /// Root prefix a maintenance job walks.
    pub fn maintenance_root(&self) -> Result<String> {
        self.mandatory("maintenance.root")
    }

    /// Table-discovery depth limit for maintenance jobs.
    pub fn maintenance_depth_limit(&self) -> Result<Option<u32>> {
        self.parsed("maintenance.depthLimit", |v| v.parse::<u32>())
    }

    /// Retry policy for storage operations at risk of concurrent
    /// modification. Absent keys fall back to the defaults.
    pub fn retry_policy(&self) -> Result<RetryPolicy> {
        let min_wait = self
            .parsed("dataStorage.retry.minWaitMillis", |v| v.parse::<u64>())?
            .map_or(DEFAULT_MIN_WAIT, Duration::from_millis);
        let max_wait = self
            .parsed("dataStorage.retry.maxWaitMillis", |v| v.parse::<u64>())?
            .map_or(DEFAULT_MAX_WAIT, Duration::from_millis);
        let jitter_factor = self
            .parsed("dataStorage.retry.jitterFactor", |v| v.parse::<f64>())?
            .unwrap_or(DEFAULT_JITTER_FACTOR);
        let max_attempts = self
            .parsed("dataStorage.retry.maxAttempts", |v| v.parse::<u32>())?
            .unwrap_or(DEFAULT_MAX_ATTEMPTS);

        RetryPolicy::new(min_wait, max_wait, jitter_factor, max_attempts).map_err(|e| {
            ConfigError::Invalid {
                key: "dataStorage.retry".into(),
                value: String::new(),
                message: e.to_string(),
            }
        })
    }

    /// Raw access to an arbitrary key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.params.get(&clean_key(key)).map(String::as_str)
    }

    fn mandatory(&self, key: &str) -> Result<String> {
        self.params
            .get(key)
            .cloned()
            .ok_or_else(|| ConfigError::Missing { key: key.into() })
    }

    fn optional(&self, key: &str) -> Option<String> {
        self.params.get(key).cloned()
    }

    fn parsed<T, E>(&self, key: &str, parse: impl Fn(&str) -> std::result::Result<T, E>) -> Result<Option<T>>
    where
        E: std::fmt::Display,
    {
        match self.params.get(key) {
            None => Ok(None),
            Some(raw) => parse(raw).map(Some).map_err(|e| ConfigError::Invalid {
                key: key.into(),
                value: raw.clone(),
                message: e.to_string(),
            }),
        }
    }
}

/// Strips a single leading `--` prefix from a parameter key.
fn clean_key(key: &str) -> String {
    key.strip_prefix("--").unwrap_or(key).to_string()
}
