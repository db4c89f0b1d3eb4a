//! Collection jobs.
//!
//! A job runs its query, extracts values and publishes them, one tick at a
//! time. Ticks of a single job never overlap.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use uuid::Uuid;

use crate::collector::CollectorError;
use crate::extract::{self, MetricValue};
use crate::sink::SinkSet;
use crate::store::Store;

/// Default refresh interval (1 minute).
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

/// How a job publishes its values.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    EnumString,
    Display,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Mode {
    /// Apply values to the target sinks on every tick.
    #[default]
    Push,
    /// Keep values in the job cache for scrape-time rendering.
    Pull,
}

/// Descriptor of a job, resolved against stores and sinks by the scheduler.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSpec {
    /// Job name, used in logs and job listings.
    pub name: String,
    /// Name of the store to query.
    pub store: String,
    /// Query text passed to the store verbatim.
    pub query: String,
    /// Names of the sinks that receive the values.
    pub sinks: Vec<String>,
    /// Refresh interval. Zero is only valid in pull mode.
    pub interval: Duration,
    /// Publication mode.
    pub mode: Mode,
}

impl JobSpec {
    /// Create a push-mode job descriptor with the default interval and no sinks.
    pub fn new(
        name: impl Into<String>,
        store: impl Into<String>,
        query: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            store: store.into(),
            query: query.into(),
            sinks: Vec::new(),
            interval: DEFAULT_INTERVAL,
            mode: Mode::Push,
        }
    }

    /// Set the target sink names.
    pub fn with_sinks(mut self, sinks: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.sinks = sinks.into_iter().map(Into::into).collect();
        self
    }

    /// Set the refresh interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the publication mode.
    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }
}

/// Values published by one successful pull-mode tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    /// Extracted values, in row order.
    pub values: Vec<MetricValue>,
    /// Number of cache replacements so far; 0 before the first one.
    pub generation: u64,
}

/// One query bound to a store, target sinks and a refresh interval.
pub struct CollectionJob {
    id: Uuid,
    name: String,
    store_name: String,
    store: Arc<dyn Store>,
    query: String,
    targets: Vec<String>,
    interval: Duration,
    mode: Mode,
    sinks: Arc<SinkSet>,
    cache: RwLock<Arc<Snapshot>>,
    serial: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for CollectionJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionJob")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("store", &self.store_name)
            .field("mode", &self.mode)
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

impl CollectionJob {
    pub(crate) fn new(spec: JobSpec, store: Arc<dyn Store>, sinks: Arc<SinkSet>) -> Self {
        // Each target receives a value once per tick, even if listed twice.
        let mut targets: Vec<String> = Vec::with_capacity(spec.sinks.len());
        for sink in spec.sinks {
            if !targets.contains(&sink) {
                targets.push(sink);
            }
        }

        Self {
            id: Uuid::new_v4(),
            name: spec.name,
            store_name: spec.store,
            store,
            query: spec.query,
            targets,
            interval: spec.interval,
            mode: spec.mode,
            sinks,
            cache: RwLock::new(Arc::new(Snapshot::default())),
            serial: tokio::sync::Mutex::new(()),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn store_name(&self) -> &str {
        &self.store_name
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    /// Target sink names, deduplicated, in configured order.
    pub fn targets(&self) -> &[String] {
        &self.targets
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Query the store and extract values, without publishing them.
    pub async fn fetch(&self) -> Result<Vec<MetricValue>, CollectorError> {
        let rows = self.store.query(&self.query).await?;
        Ok(extract::eval(rows)?)
    }

    /// Run one tick and return the number of values published.
    ///
    /// Push mode applies every value to every target sink; pull mode replaces
    /// the cache. On error nothing is published and previously published
    /// values stay as they were.
    pub async fn tick(&self) -> Result<usize, CollectorError> {
        match self.mode {
            Mode::Push => {
                let _serial = self.serial.lock().await;
                let values = self.fetch().await?;
                for value in &values {
                    self.sinks.dispatch(value, &self.targets);
                }
                Ok(values.len())
            }
            Mode::Pull => self.refresh().await.map(|snapshot| snapshot.values.len()),
        }
    }

    /// Run one tick into the cache and return the new snapshot.
    pub async fn refresh(&self) -> Result<Arc<Snapshot>, CollectorError> {
        let _serial = self.serial.lock().await;
        let values = self.fetch().await?;
        Ok(self.replace(values))
    }

    /// The most recent cache snapshot.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.cache.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn replace(&self, values: Vec<MetricValue>) -> Arc<Snapshot> {
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        let next = Arc::new(Snapshot {
            values,
            generation: cache.generation + 1,
        });
        *cache = Arc::clone(&next);
        next
    }
}
