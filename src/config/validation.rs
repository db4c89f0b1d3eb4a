//! Configuration validation utilities.

use thiserror::Error;

use crate::sink::SinkError;
use crate::store::StoreError;

/// Configuration error types.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse YAML configuration.
    #[error("failed to parse YAML config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    /// Configuration validation failed.
    #[error("config validation error: {0}")]
    ValidationError(String),

    /// A job names a store that is not configured.
    #[error("job '{job}' references unknown store '{store}'")]
    UnknownStore { job: String, store: String },

    /// A job has no target sinks.
    #[error("job '{job}' has no target sinks")]
    EmptyTargets { job: String },

    /// A sink declares a kind other than counter, gauge, histogram or summary.
    #[error("sink '{sink}' has unknown kind '{kind}'")]
    UnknownSinkKind { sink: String, kind: String },

    /// A sink definition was rejected when building its metric.
    #[error("sink '{sink}': {source}")]
    Sink {
        sink: String,
        #[source]
        source: SinkError,
    },

    /// A store could not be built from its definition.
    #[error("store '{store}': {source}")]
    Store {
        store: String,
        #[source]
        source: StoreError,
    },
}

/// Expand environment variables in a string.
/// Supports ${VAR} and ${VAR:-default} syntax.
///
/// Unset variables without a default expand to the empty string.
pub fn expand_env_vars(input: &str) -> String {
    static ENV_VAR_REGEX: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();

    let regex = ENV_VAR_REGEX.get_or_init(|| {
        regex::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
            .expect("env var pattern is a valid regex")
    });

    regex
        .replace_all(input, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default_value = caps.get(2).map(|m| m.as_str()).unwrap_or("");
            std::env::var(var_name).unwrap_or_else(|_| default_value.to_string())
        })
        .into_owned()
}
