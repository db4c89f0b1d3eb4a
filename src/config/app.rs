//! Application configuration structures.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::IpAddr;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::collector::{DEFAULT_INTERVAL, JobSpec, Mode, Scheduler};
use crate::sink::{Sink, SinkKind, SinkSet, SinkSpec};
use crate::store::db::DEFAULT_MAX_CONNECTIONS;
use crate::store::{SqlStore, StaticStore, Store};

use super::validation::{ConfigError, expand_env_vars};

// =============================================================================
// Constants
// =============================================================================

/// Default exposition port (9187).
pub const DEFAULT_PORT: u16 = 9187;

fn default_max_connections() -> u32 {
    DEFAULT_MAX_CONNECTIONS
}

fn default_interval() -> Duration {
    DEFAULT_INTERVAL
}

// =============================================================================
// Server Configuration
// =============================================================================

/// Web server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server bind address (default: "0.0.0.0").
    pub bind: String,

    /// Server port (default: 9187).
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
        }
    }
}

// =============================================================================
// Store, Sink and Job Configuration
// =============================================================================

/// A named store definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StoreConfig {
    /// Fixed comma-separated rows, returned for every query.
    Static { rows: String },

    /// Live SQLite database.
    Sql {
        url: String,
        #[serde(default = "default_max_connections")]
        max_connections: u32,
    },
}

/// A sink definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinkConfig {
    pub name: String,

    /// Kept as text so an unknown kind can be reported by name.
    pub kind: String,

    #[serde(default)]
    pub help: String,

    #[serde(default)]
    pub labels: Vec<String>,

    /// Histogram and summary buckets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buckets: Option<Vec<f64>>,
}

/// A job definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    /// Defaults to `job-<index>`.
    #[serde(default)]
    pub name: Option<String>,

    pub store: String,

    pub query: String,

    /// Refresh interval (default: 1m). `0s` makes a pull job query on every scrape.
    #[serde(default = "default_interval", with = "humantime_serde")]
    pub interval: Duration,

    #[serde(default)]
    pub sinks: Vec<String>,

    #[serde(default)]
    pub mode: Mode,
}

// =============================================================================
// Application Configuration
// =============================================================================

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Web server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Stores by name.
    #[serde(default)]
    pub stores: BTreeMap<String, StoreConfig>,

    #[serde(default)]
    pub sinks: Vec<SinkConfig>,

    #[serde(default)]
    pub jobs: Vec<JobConfig>,
}

impl AppConfig {
    /// Load configuration from a YAML file.
    ///
    /// `${VAR}` and `${VAR:-default}` references are expanded before parsing.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read, parsed, or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Parse and validate configuration text.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(&expand_env_vars(content))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// Cross-references between jobs, stores and sinks are checked when the
    /// scheduler is built.
    ///
    /// # Errors
    /// Returns `ConfigError` if any field is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Validate server bind address
        self.server.bind.parse::<IpAddr>().map_err(|_| {
            ConfigError::ValidationError(format!(
                "invalid server bind address: '{}'",
                self.server.bind
            ))
        })?;

        // Validate server port
        if self.server.port == 0 {
            return Err(ConfigError::ValidationError(
                "server port must be non-zero".to_string(),
            ));
        }

        let mut seen_sinks = HashSet::new();
        for sink in &self.sinks {
            if sink.name.is_empty() {
                return Err(ConfigError::ValidationError(
                    "sink name cannot be empty".to_string(),
                ));
            }
            if !seen_sinks.insert(&sink.name) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate sink name: '{}'",
                    sink.name
                )));
            }
            parse_kind(sink)?;
        }

        let mut seen_jobs = HashSet::new();
        for (index, job) in self.jobs.iter().enumerate() {
            let name = job_name(job, index);
            if !seen_jobs.insert(name.clone()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate job name: '{}'",
                    name
                )));
            }
        }

        Ok(())
    }

    /// Sink definitions, in configuration order.
    pub fn sink_specs(&self) -> Result<Vec<SinkSpec>, ConfigError> {
        self.sinks
            .iter()
            .map(|sink| {
                let spec = SinkSpec::new(&sink.name, parse_kind(sink)?)
                    .with_help(&sink.help)
                    .with_labels(&sink.labels);
                Ok(match &sink.buckets {
                    Some(buckets) => spec.with_buckets(buckets.clone()),
                    None => spec,
                })
            })
            .collect()
    }

    /// Job descriptors, in configuration order.
    pub fn job_specs(&self) -> Vec<JobSpec> {
        self.jobs
            .iter()
            .enumerate()
            .map(|(index, job)| {
                JobSpec::new(job_name(job, index), &job.store, &job.query)
                    .with_sinks(&job.sinks)
                    .with_interval(job.interval)
                    .with_mode(job.mode)
            })
            .collect()
    }

    /// Build every configured store.
    ///
    /// SQL stores connect lazily, so this performs no I/O, but it must run
    /// within a Tokio runtime.
    pub fn build_stores(&self) -> Result<HashMap<String, Arc<dyn Store>>, ConfigError> {
        self.stores
            .iter()
            .map(|(name, config)| {
                let store: Result<Arc<dyn Store>, _> = match config {
                    StoreConfig::Static { rows } => {
                        StaticStore::parse(rows).map(|s| Arc::new(s) as Arc<dyn Store>)
                    }
                    StoreConfig::Sql {
                        url,
                        max_connections,
                    } => SqlStore::connect_lazy(url, *max_connections)
                        .map(|s| Arc::new(s) as Arc<dyn Store>),
                };
                let store = store.map_err(|source| ConfigError::Store {
                    store: name.clone(),
                    source,
                })?;
                Ok((name.clone(), store))
            })
            .collect()
    }

    /// Build stores, sinks and jobs into a scheduler.
    pub fn build_scheduler(&self) -> Result<Scheduler, ConfigError> {
        let sinks = self
            .sink_specs()?
            .into_iter()
            .map(|spec| {
                let name = spec.name.clone();
                Sink::new(spec).map_err(|source| ConfigError::Sink { sink: name, source })
            })
            .collect::<Result<SinkSet, _>>()?;

        Scheduler::new(self.job_specs(), self.build_stores()?, sinks)
    }
}

fn parse_kind(sink: &SinkConfig) -> Result<SinkKind, ConfigError> {
    SinkKind::from_str(&sink.kind).map_err(|_| ConfigError::UnknownSinkKind {
        sink: sink.name.clone(),
        kind: sink.kind.clone(),
    })
}

fn job_name(job: &JobConfig, index: usize) -> String {
    job.name.clone().unwrap_or_else(|| format!("job-{}", index))
}
