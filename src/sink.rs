//! Metric sinks.
//!
//! A [`Sink`] applies a [`MetricValue`] to one Prometheus metric vector:
//!
//! | Kind        | Operation              |
//! |-------------|------------------------|
//! | `counter`   | add (monotonic)        |
//! | `gauge`     | set (overwrite)        |
//! | `histogram` | observe                |
//! | `summary`   | observe                |
//!
//! The kind is resolved once when the sink is built. [`SinkSet`] maps sink
//! names to sinks and dispatches a value to a job's target names, skipping
//! names it cannot resolve.

use std::collections::HashMap;
use std::sync::Arc;

use prometheus::proto::MetricFamily;
use prometheus::{CounterVec, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use thiserror::Error;

use crate::extract::MetricValue;

/// Errors raised when a sink cannot accept a value.
#[derive(Debug, Error)]
pub enum SinkError {
    /// Rejected by the Prometheus client (invalid name, label count mismatch, ...).
    #[error("prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),

    /// Counters only move forward, and never by NaN.
    #[error("counter '{sink}' cannot be increased by {value}")]
    InvalidIncrement { sink: String, value: f64 },
}

/// The four metric shapes a sink can take.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum SinkKind {
    Counter,
    Gauge,
    Histogram,
    Summary,
}

/// Definition of a sink.
#[derive(Debug, Clone, PartialEq)]
pub struct SinkSpec {
    /// Metric name, unique across sinks.
    pub name: String,
    /// Help text exposed with the metric.
    pub help: String,
    /// Metric shape.
    pub kind: SinkKind,
    /// Label names, matched positionally to [`MetricValue::labels`].
    pub label_names: Vec<String>,
    /// Bucket bounds for histogram and summary sinks; client defaults if `None`.
    pub buckets: Option<Vec<f64>>,
}

impl SinkSpec {
    /// Create a sink definition with empty help and no labels.
    pub fn new(name: impl Into<String>, kind: SinkKind) -> Self {
        Self {
            name: name.into(),
            help: String::new(),
            kind,
            label_names: Vec::new(),
            buckets: None,
        }
    }

    /// Set the help text.
    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = help.into();
        self
    }

    /// Set the label names.
    pub fn with_labels(mut self, labels: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.label_names = labels.into_iter().map(Into::into).collect();
        self
    }

    /// Set histogram/summary bucket bounds.
    pub fn with_buckets(mut self, buckets: Vec<f64>) -> Self {
        self.buckets = Some(buckets);
        self
    }

    fn help_text(&self) -> String {
        // The client rejects empty help strings.
        if self.help.is_empty() {
            self.name.clone()
        } else {
            self.help.clone()
        }
    }

    fn histogram_opts(&self) -> HistogramOpts {
        let opts = HistogramOpts::new(&self.name, self.help_text());
        match &self.buckets {
            Some(buckets) => opts.buckets(buckets.clone()),
            None => opts,
        }
    }
}

#[derive(Clone)]
enum SinkMetric {
    Counter(CounterVec),
    Gauge(GaugeVec),
    // Summaries are observed into a bucketed vector: the client crate ships
    // no summary type.
    Observed(HistogramVec),
}

/// A named metric vector that values are applied to.
#[derive(Clone)]
pub struct Sink {
    spec: SinkSpec,
    metric: SinkMetric,
}

impl std::fmt::Debug for Sink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sink")
            .field("name", &self.spec.name)
            .field("kind", &self.spec.kind)
            .finish_non_exhaustive()
    }
}

impl Sink {
    /// Build the metric vector described by `spec`.
    pub fn new(spec: SinkSpec) -> Result<Self, SinkError> {
        let labels: Vec<&str> = spec.label_names.iter().map(String::as_str).collect();
        let opts = || Opts::new(&spec.name, spec.help_text());
        let metric = match spec.kind {
            SinkKind::Counter => SinkMetric::Counter(CounterVec::new(opts(), &labels)?),
            SinkKind::Gauge => SinkMetric::Gauge(GaugeVec::new(opts(), &labels)?),
            SinkKind::Histogram | SinkKind::Summary => {
                SinkMetric::Observed(HistogramVec::new(spec.histogram_opts(), &labels)?)
            }
        };
        Ok(Self { spec, metric })
    }

    /// Sink name.
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// Sink kind.
    pub fn kind(&self) -> SinkKind {
        self.spec.kind
    }

    /// Sink definition.
    pub fn spec(&self) -> &SinkSpec {
        &self.spec
    }

    /// Apply one value: add for counters, set for gauges, observe otherwise.
    pub fn apply(&self, value: &MetricValue) -> Result<(), SinkError> {
        let labels = value.label_refs();
        let labels = labels.as_slice();
        match &self.metric {
            SinkMetric::Counter(vec) => {
                if value.value.is_nan() || value.value < 0.0 {
                    return Err(SinkError::InvalidIncrement {
                        sink: self.spec.name.clone(),
                        value: value.value,
                    });
                }
                vec.get_metric_with_label_values(labels)?.inc_by(value.value);
            }
            SinkMetric::Gauge(vec) => vec.get_metric_with_label_values(labels)?.set(value.value),
            SinkMetric::Observed(vec) => {
                vec.get_metric_with_label_values(labels)?.observe(value.value)
            }
        }
        Ok(())
    }

    /// Register the metric vector with `registry`.
    pub fn register(&self, registry: &Registry) -> Result<(), prometheus::Error> {
        match &self.metric {
            SinkMetric::Counter(vec) => registry.register(Box::new(vec.clone())),
            SinkMetric::Gauge(vec) => registry.register(Box::new(vec.clone())),
            SinkMetric::Observed(vec) => registry.register(Box::new(vec.clone())),
        }
    }

    /// Render `values` as a standalone metric family of this sink's shape.
    ///
    /// Builds a fresh vector in a private registry so that rendering never
    /// touches the registered one. Counters and gauges report the last value
    /// given for each label set; histograms and summaries observe every value.
    /// Values the sink rejects are skipped with a warning; if none are left the
    /// result is empty.
    pub fn render(&self, values: &[MetricValue]) -> Result<Vec<MetricFamily>, SinkError> {
        let values: Vec<&MetricValue> = match self.spec.kind {
            SinkKind::Counter | SinkKind::Gauge => latest_per_label_set(values),
            SinkKind::Histogram | SinkKind::Summary => values.iter().collect(),
        };

        let fresh = Sink::new(self.spec.clone())?;
        for value in values {
            if let Err(e) = fresh.apply(value) {
                tracing::warn!(sink = %self.spec.name, error = %e, "Value skipped");
            }
        }
        let scratch = Registry::new();
        fresh.register(&scratch)?;
        Ok(scratch.gather())
    }
}

fn latest_per_label_set(values: &[MetricValue]) -> Vec<&MetricValue> {
    let mut latest: HashMap<&[String], &MetricValue> = HashMap::new();
    for value in values {
        latest.insert(value.labels.as_slice(), value);
    }
    latest.into_values().collect()
}

/// Sinks by name.
#[derive(Debug, Clone, Default)]
pub struct SinkSet {
    sinks: HashMap<String, Arc<Sink>>,
}

impl SinkSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sink, replacing any sink with the same name.
    pub fn insert(&mut self, sink: Sink) {
        self.sinks.insert(sink.name().to_string(), Arc::new(sink));
    }

    /// Look up a sink by name.
    pub fn get(&self, name: &str) -> Option<&Arc<Sink>> {
        self.sinks.get(name)
    }

    /// Whether a sink with this name exists.
    pub fn contains(&self, name: &str) -> bool {
        self.sinks.contains_key(name)
    }

    /// Iterate over all sinks.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Sink>> {
        self.sinks.values()
    }

    /// Number of sinks.
    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// Apply `value` once to each named target.
    ///
    /// Targets that do not resolve to a sink, and sinks that reject the value,
    /// are skipped; the remaining targets still receive it. Returns the number
    /// of sinks the value was applied to.
    pub fn dispatch(&self, value: &MetricValue, targets: &[String]) -> usize {
        let mut applied = 0;
        for target in targets {
            let Some(sink) = self.sinks.get(target) else {
                tracing::debug!(sink = %target, "Unresolved sink skipped");
                continue;
            };
            match sink.apply(value) {
                Ok(()) => applied += 1,
                Err(e) => {
                    tracing::warn!(
                        sink = %target,
                        kind = %sink.kind(),
                        error = %e,
                        "Sink rejected value"
                    );
                }
            }
        }
        applied
    }
}

impl FromIterator<Sink> for SinkSet {
    fn from_iter<I: IntoIterator<Item = Sink>>(iter: I) -> Self {
        let mut set = Self::new();
        for sink in iter {
            set.insert(sink);
        }
        set
    }
}
