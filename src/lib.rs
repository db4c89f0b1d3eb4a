//! rowgauge - SQL query results as Prometheus metrics
//!
//! This crate runs SQL queries on a schedule and turns each result row into a
//! metric sample. It can be used as a library, or run as a standalone binary
//! with the `rowgauge` executable.
//!
//! # Architecture
//!
//! - **Store**: query text in, rows of strings out ([`StaticStore`], [`SqlStore`])
//! - **Extract**: field 0 becomes the value, the rest become label values
//! - **Sink**: counter, gauge, histogram or summary vectors ([`Sink`], [`SinkSet`])
//! - **Collector**: jobs, the [`Scheduler`] and pull-mode [`CachingCollector`]s
//! - **Server**: `/metrics` exposition over axum
//!
//! A row `3024,foo,1h` applied to a gauge with labels `[site, window]` sets
//! `num_orders{site="foo",window="1h"}` to 3024.

pub mod collector;
pub mod config;
pub mod extract;
pub mod server;
pub mod sink;
pub mod store;

pub use collector::{
    CachingCollector, CollectionJob, CollectorError, JobInfo, JobSpec, Mode, Scheduler,
    SchedulerState, Snapshot,
};
pub use config::{AppConfig, ConfigError};
pub use extract::{MetricValue, RawRow, ValueParseError};
pub use sink::{Sink, SinkError, SinkKind, SinkSet, SinkSpec};
pub use store::{SqlStore, StaticStore, Store, StoreError};
