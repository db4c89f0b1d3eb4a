//! Collector Layer
//!
//! Scheduled collection engine. Each [`CollectionJob`] binds one query, one
//! store and a set of target sinks. The [`Scheduler`] owns every job and runs
//! one Tokio task per timed job.
//!
//! # Modes
//!
//! - **Push**: every tick applies the extracted values to the target sinks.
//! - **Pull**: every tick replaces the job's cache; [`CachingCollector`]
//!   renders the cache at scrape time. A pull job with a zero interval has no
//!   task and queries on every scrape instead.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::collections::HashMap;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use rowgauge::{JobSpec, Scheduler, Sink, SinkKind, SinkSet, SinkSpec, StaticStore, Store};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let store: Arc<dyn Store> = Arc::new(StaticStore::parse("3024,foo\n534,bar")?);
//! let gauge = SinkSpec::new("num_orders", SinkKind::Gauge).with_labels(["site"]);
//! let sinks: SinkSet = [Sink::new(gauge)?].into_iter().collect();
//! let job = JobSpec::new("orders", "default", "SELECT 1")
//!     .with_sinks(["num_orders"])
//!     .with_interval(Duration::from_secs(60));
//!
//! let stores = HashMap::from([("default".to_string(), store)]);
//! let scheduler = Scheduler::new(vec![job], stores, sinks)?;
//! let registry = prometheus::Registry::new();
//! scheduler.start(&registry).await?;
//! // ... serve registry.gather() plus scheduler.scrape().await
//! scheduler.stop().await?;
//! # Ok(())
//! # }
//! ```

mod cache;
mod error;
mod job;
mod scheduler;

pub use cache::{CachingCollector, render_pull};
pub use error::CollectorError;
pub use job::{CollectionJob, DEFAULT_INTERVAL, JobSpec, Mode, Snapshot};
pub use scheduler::{JobInfo, Scheduler, SchedulerState};
