//! Configuration module for rowgauge.
//!
//! Provides YAML-based configuration loading and validation for:
//! - Server settings (port, bind address)
//! - Stores (static rows or SQLite URL)
//! - Sinks (name, kind, labels, buckets)
//! - Jobs (store, query, interval, target sinks, mode)

mod app;
mod validation;

pub use app::{AppConfig, DEFAULT_PORT, JobConfig, ServerConfig, SinkConfig, StoreConfig};
pub use validation::{ConfigError, expand_env_vars};
