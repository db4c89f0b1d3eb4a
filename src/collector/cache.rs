//! Pull-mode collectors.

use std::collections::BTreeMap;
use std::sync::Arc;

use prometheus::proto::MetricFamily;

use crate::collector::{CollectionJob, Snapshot};
use crate::extract::MetricValue;
use crate::sink::SinkSet;

/// Serves a pull-mode job's values at scrape time.
///
/// With a non-zero interval the scrape reads the cache the job's background
/// task keeps fresh. With a zero interval there is no task: every scrape runs
/// a tick and serves its result.
#[derive(Debug, Clone)]
pub struct CachingCollector {
    job: Arc<CollectionJob>,
}

impl CachingCollector {
    pub fn new(job: Arc<CollectionJob>) -> Self {
        Self { job }
    }

    pub fn job(&self) -> &Arc<CollectionJob> {
        &self.job
    }

    /// Whether every scrape queries the store.
    pub fn is_on_demand(&self) -> bool {
        self.job.interval().is_zero()
    }

    /// Values to expose for the current scrape.
    ///
    /// An on-demand refresh that fails serves an empty snapshot.
    pub async fn current(&self) -> Arc<Snapshot> {
        if !self.is_on_demand() {
            return self.job.snapshot();
        }

        match self.job.refresh().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::error!(
                    job = %self.job.name(),
                    error = %e,
                    "Scrape-time collection failed"
                );
                Arc::new(Snapshot::default())
            }
        }
    }
}

/// Render the current values of every pull-mode collector.
///
/// Values are grouped per target sink and rendered with that sink's
/// definition, so several jobs feeding one sink end up in one family.
pub async fn render_pull(collectors: &[CachingCollector], sinks: &SinkSet) -> Vec<MetricFamily> {
    let mut grouped: BTreeMap<&str, Vec<MetricValue>> = BTreeMap::new();

    for collector in collectors {
        let snapshot = collector.current().await;
        for target in collector.job().targets() {
            grouped
                .entry(target.as_str())
                .or_default()
                .extend(snapshot.values.iter().cloned());
        }
    }

    let mut families = Vec::new();
    for (name, values) in grouped {
        let Some(sink) = sinks.get(name) else {
            tracing::debug!(sink = %name, "Unresolved sink skipped");
            continue;
        };
        match sink.render(&values) {
            Ok(rendered) => families.extend(rendered),
            Err(e) => tracing::warn!(sink = %name, error = %e, "Sink render failed"),
        }
    }
    families
}
