//! Scheduler for managing collection job lifecycle.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use prometheus::Registry;
use prometheus::proto::MetricFamily;
use serde::Serialize;
use strum_macros::Display;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::collector::{
    CachingCollector, CollectionJob, CollectorError, JobSpec, Mode, render_pull,
};
use crate::config::ConfigError;
use crate::sink::SinkSet;
use crate::store::Store;

/// Lifecycle state of a [`Scheduler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SchedulerState {
    Created,
    Running,
    Stopped,
}

/// Metadata about a configured job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobInfo {
    /// Job UUID.
    pub id: Uuid,
    /// Job name.
    pub name: String,
    /// Store name.
    pub store: String,
    /// Publication mode.
    pub mode: Mode,
    /// Refresh interval, humantime formatted.
    pub interval: String,
    /// Target sink names.
    pub sinks: Vec<String>,
}

impl From<&CollectionJob> for JobInfo {
    fn from(job: &CollectionJob) -> Self {
        Self {
            id: job.id(),
            name: job.name().to_string(),
            store: job.store_name().to_string(),
            mode: job.mode(),
            interval: humantime::format_duration(job.interval()).to_string(),
            sinks: job.targets().to_vec(),
        }
    }
}

struct JobTask {
    name: String,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

enum Lifecycle {
    Created,
    Running(Vec<JobTask>),
    Stopped,
}

impl Lifecycle {
    fn state(&self) -> SchedulerState {
        match self {
            Self::Created => SchedulerState::Created,
            Self::Running(_) => SchedulerState::Running,
            Self::Stopped => SchedulerState::Stopped,
        }
    }
}

/// Owns every collection job and drives their background tasks.
///
/// Lifecycle is `Created -> Running -> Stopped`, one way. Starting registers
/// every sink once and spawns one task per job with a non-zero interval;
/// stopping cancels the tasks and closes every distinct store once.
pub struct Scheduler {
    jobs: Vec<Arc<CollectionJob>>,
    pull: Vec<CachingCollector>,
    sinks: Arc<SinkSet>,
    stores: Vec<(String, Arc<dyn Store>)>,
    lifecycle: Mutex<Lifecycle>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("state", &self.state())
            .field("job_count", &self.jobs.len())
            .field("sink_count", &self.sinks.len())
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    /// Bind job descriptors to stores and sinks.
    ///
    /// Rejects a job with no targets, an unknown store, a push job with a zero
    /// interval, and a sink targeted by both push and pull jobs. Target names
    /// that match no sink are accepted and skipped at dispatch time.
    pub fn new(
        specs: Vec<JobSpec>,
        stores: HashMap<String, Arc<dyn Store>>,
        sinks: SinkSet,
    ) -> Result<Self, ConfigError> {
        let sinks = Arc::new(sinks);
        let mut pushed: HashSet<String> = HashSet::new();
        let mut pulled: HashSet<String> = HashSet::new();
        let mut jobs = Vec::with_capacity(specs.len());

        for spec in specs {
            if spec.sinks.is_empty() {
                return Err(ConfigError::EmptyTargets { job: spec.name });
            }
            let Some(store) = stores.get(&spec.store) else {
                return Err(ConfigError::UnknownStore {
                    job: spec.name,
                    store: spec.store,
                });
            };
            if spec.mode == Mode::Push && spec.interval.is_zero() {
                return Err(ConfigError::ValidationError(format!(
                    "job '{}': push mode requires a non-zero interval",
                    spec.name
                )));
            }

            let (own, other) = match spec.mode {
                Mode::Push => (&mut pushed, &pulled),
                Mode::Pull => (&mut pulled, &pushed),
            };
            for sink in &spec.sinks {
                if other.contains(sink) {
                    return Err(ConfigError::ValidationError(format!(
                        "sink '{}' is targeted by both push and pull jobs",
                        sink
                    )));
                }
                own.insert(sink.clone());
            }

            jobs.push(Arc::new(CollectionJob::new(
                spec,
                Arc::clone(store),
                Arc::clone(&sinks),
            )));
        }

        let pull = jobs
            .iter()
            .filter(|job| job.mode() == Mode::Pull)
            .map(|job| CachingCollector::new(Arc::clone(job)))
            .collect();

        Ok(Self {
            jobs,
            pull,
            sinks,
            stores: distinct_stores(stores),
            lifecycle: Mutex::new(Lifecycle::Created),
        })
    }

    /// Register every sink with `registry` and start the job tasks.
    ///
    /// Returns once every task has finished its first tick, so startup takes as
    /// long as the slowest first query. A store that hangs keeps `start` from
    /// returning even though [`state`](Self::state) already reads running.
    /// Fails unless the scheduler is in the created state.
    pub async fn start(&self, registry: &Registry) -> Result<(), CollectorError> {
        let primed = {
            let mut lifecycle = self.lock();
            if !matches!(*lifecycle, Lifecycle::Created) {
                return Err(CollectorError::Lifecycle {
                    expected: SchedulerState::Created,
                    actual: lifecycle.state(),
                });
            }

            for sink in self.sinks.iter() {
                sink.register(registry)
                    .map_err(|source| CollectorError::Register {
                        sink: sink.name().to_string(),
                        source,
                    })?;
            }

            let mut tasks = Vec::new();
            let mut primed = Vec::new();
            for job in self.jobs.iter().filter(|job| !job.interval().is_zero()) {
                let cancel = CancellationToken::new();
                let (tx, rx) = oneshot::channel();
                let handle = tokio::spawn(run_job(Arc::clone(job), cancel.clone(), tx));
                tasks.push(JobTask {
                    name: job.name().to_string(),
                    cancel,
                    handle,
                });
                primed.push(rx);
            }

            tracing::info!(
                job_count = self.jobs.len(),
                task_count = tasks.len(),
                sink_count = self.sinks.len(),
                "Scheduler started"
            );
            *lifecycle = Lifecycle::Running(tasks);
            primed
        };

        // A task that panicked in its first tick drops the sender.
        for rx in primed {
            let _ = rx.await;
        }
        Ok(())
    }

    /// Cancel every job task, wait for them to exit and close every store.
    ///
    /// A tick in progress runs to completion first. Fails without any effect
    /// unless the scheduler is running.
    pub async fn stop(&self) -> Result<(), CollectorError> {
        let tasks = {
            let mut lifecycle = self.lock();
            match std::mem::replace(&mut *lifecycle, Lifecycle::Stopped) {
                Lifecycle::Running(tasks) => tasks,
                other => {
                    let actual = other.state();
                    *lifecycle = other;
                    return Err(CollectorError::Lifecycle {
                        expected: SchedulerState::Running,
                        actual,
                    });
                }
            }
        };

        for task in &tasks {
            task.cancel.cancel();
        }
        for task in tasks {
            if let Err(e) = task.handle.await {
                tracing::error!(job = %task.name, error = %e, "Job task panicked");
            }
        }

        for (name, store) in &self.stores {
            match store.close().await {
                Ok(()) => tracing::debug!(store = %name, "Store closed"),
                Err(e) => tracing::warn!(store = %name, error = %e, "Failed to close store"),
            }
        }

        tracing::info!(job_count = self.jobs.len(), "Scheduler stopped");
        Ok(())
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SchedulerState {
        self.lock().state()
    }

    /// List all configured jobs, in configuration order.
    pub fn list_jobs(&self) -> Vec<JobInfo> {
        self.jobs.iter().map(|job| JobInfo::from(job.as_ref())).collect()
    }

    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    pub fn jobs(&self) -> &[Arc<CollectionJob>] {
        &self.jobs
    }

    /// Look up a job by name.
    pub fn job(&self, name: &str) -> Option<&Arc<CollectionJob>> {
        self.jobs.iter().find(|job| job.name() == name)
    }

    pub fn sinks(&self) -> &SinkSet {
        &self.sinks
    }

    /// Render the pull-mode jobs for one scrape.
    pub async fn scrape(&self) -> Vec<MetricFamily> {
        render_pull(&self.pull, &self.sinks).await
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        let lifecycle = self.lifecycle.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Lifecycle::Running(tasks) = lifecycle {
            for task in tasks.iter() {
                task.cancel.cancel();
            }
        }
    }
}

/// One store handle per distinct store, even when several names alias it.
fn distinct_stores(stores: HashMap<String, Arc<dyn Store>>) -> Vec<(String, Arc<dyn Store>)> {
    let mut stores: Vec<_> = stores.into_iter().collect();
    stores.sort_by(|a, b| a.0.cmp(&b.0));

    let mut seen = HashSet::new();
    stores.retain(|(_, store)| seen.insert(Arc::as_ptr(store).cast::<()>()));
    stores
}

/// Background task of one job: an immediate tick, then one per period.
async fn run_job(
    job: Arc<CollectionJob>,
    cancel: CancellationToken,
    primed: oneshot::Sender<()>,
) {
    let period = job.interval();
    tracing::debug!(job = %job.name(), job_id = %job.id(), ?period, "Job task started");

    run_tick(&job).await;
    let _ = primed.send(());

    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => run_tick(&job).await,
        }
    }

    tracing::debug!(job = %job.name(), "Job task exited");
}

async fn run_tick(job: &CollectionJob) {
    let start = std::time::Instant::now();
    let result = job.tick().await;
    let duration_ms = start.elapsed().as_millis();

    match result {
        Ok(count) => {
            tracing::debug!(
                job = %job.name(),
                values = count,
                duration_ms,
                "Collection succeeded"
            );
        }
        Err(e) => {
            tracing::error!(job = %job.name(), error = %e, duration_ms, "Collection failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{Sink, SinkKind, SinkSpec};
    use crate::store::{StaticStore, StoreError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use crate::extract::RawRow;

    /// Store that counts calls and can hold each query for a while.
    #[derive(Default)]
    struct CountingStore {
        queries: AtomicUsize,
        closes: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        delay: Duration,
    }

    #[async_trait]
    impl Store for CountingStore {
        async fn query(&self, _text: &str) -> Result<Vec<RawRow>, StoreError> {
            let n = self.queries.fetch_add(1, Ordering::SeqCst) + 1;
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(vec![vec![n.to_string(), "foo".to_string()]])
        }

        async fn close(&self) -> Result<(), StoreError> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Store whose second query takes five seconds.
    #[derive(Default)]
    struct SlowSecondQueryStore {
        queries: AtomicUsize,
        completed: AtomicUsize,
        completed_at_close: AtomicUsize,
    }

    #[async_trait]
    impl Store for SlowSecondQueryStore {
        async fn query(&self, _text: &str) -> Result<Vec<RawRow>, StoreError> {
            if self.queries.fetch_add(1, Ordering::SeqCst) == 1 {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            let n = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(vec![vec![n.to_string(), "foo".to_string()]])
        }

        async fn close(&self) -> Result<(), StoreError> {
            let completed = self.completed.load(Ordering::SeqCst);
            self.completed_at_close.store(completed, Ordering::SeqCst);
            Ok(())
        }
    }

    fn gauge_sinks() -> SinkSet {
        let spec = SinkSpec::new("num_orders", SinkKind::Gauge).with_labels(["site"]);
        [Sink::new(spec).unwrap()].into_iter().collect()
    }

    fn stores(store: Arc<dyn Store>) -> HashMap<String, Arc<dyn Store>> {
        HashMap::from([("db".to_string(), store)])
    }

    fn job(name: &str) -> JobSpec {
        JobSpec::new(name, "db", "SELECT 1")
            .with_sinks(["num_orders"])
            .with_interval(Duration::from_secs(60))
    }

    fn exposition(registry: &Registry, extra: Vec<MetricFamily>) -> String {
        let mut families = registry.gather();
        families.extend(extra);
        prometheus::TextEncoder::new()
            .encode_to_string(&families)
            .unwrap()
    }

    #[test]
    fn test_new_rejects_invalid_jobs() {
        let store: Arc<dyn Store> = Arc::new(CountingStore::default());

        let err = Scheduler::new(
            vec![JobSpec::new("orders", "db", "SELECT 1")],
            stores(Arc::clone(&store)),
            gauge_sinks(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::EmptyTargets { ref job } if job == "orders"));

        let mut missing = job("orders");
        missing.store = "other".to_string();
        let err = Scheduler::new(vec![missing], stores(Arc::clone(&store)), gauge_sinks())
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownStore { ref store, .. } if store == "other"));

        let err = Scheduler::new(
            vec![job("orders").with_interval(Duration::ZERO)],
            stores(Arc::clone(&store)),
            gauge_sinks(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));

        let err = Scheduler::new(
            vec![job("push"), job("pull").with_mode(Mode::Pull)],
            stores(Arc::clone(&store)),
            gauge_sinks(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("num_orders"));
    }

    #[test]
    fn test_new_accepts_unresolved_targets() {
        let store: Arc<dyn Store> = Arc::new(CountingStore::default());
        let scheduler = Scheduler::new(
            vec![job("orders").with_sinks(["num_orders", "missing"])],
            stores(store),
            gauge_sinks(),
        )
        .unwrap();
        assert_eq!(scheduler.state(), SchedulerState::Created);
        assert_eq!(scheduler.list_jobs()[0].sinks, vec!["num_orders", "missing"]);
        assert_eq!(scheduler.list_jobs()[0].interval, "1m");
    }

    #[tokio::test]
    async fn test_stop_before_start_fails() {
        let store = Arc::new(CountingStore::default());
        let scheduler = Scheduler::new(vec![job("orders")], stores(store.clone()), gauge_sinks())
            .unwrap();

        let err = scheduler.stop().await.unwrap_err();
        assert!(matches!(
            err,
            CollectorError::Lifecycle {
                expected: SchedulerState::Running,
                actual: SchedulerState::Created
            }
        ));
        assert_eq!(scheduler.state(), SchedulerState::Created);
        assert_eq!(store.closes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_start_twice_registers_once() {
        let store = Arc::new(CountingStore::default());
        let scheduler = Scheduler::new(vec![job("orders")], stores(store), gauge_sinks()).unwrap();
        let registry = Registry::new();

        scheduler.start(&registry).await.unwrap();
        let err = scheduler.start(&registry).await.unwrap_err();
        assert!(matches!(
            err,
            CollectorError::Lifecycle {
                actual: SchedulerState::Running,
                ..
            }
        ));

        let text = exposition(&registry, Vec::new());
        assert_eq!(text.matches("# TYPE num_orders gauge").count(), 1);
        scheduler.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_push_job_applies_on_start() {
        let store = Arc::new(CountingStore::default());
        let scheduler = Scheduler::new(vec![job("orders")], stores(store.clone()), gauge_sinks())
            .unwrap();
        let registry = Registry::new();

        scheduler.start(&registry).await.unwrap();
        assert_eq!(store.queries.load(Ordering::SeqCst), 1);
        assert!(exposition(&registry, Vec::new()).contains(r#"num_orders{site="foo"} 1"#));
        scheduler.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_pull_cache_primed_after_start() {
        let store = Arc::new(CountingStore::default());
        let scheduler = Scheduler::new(
            vec![job("orders").with_mode(Mode::Pull)],
            stores(store.clone()),
            gauge_sinks(),
        )
        .unwrap();
        let registry = Registry::new();

        scheduler.start(&registry).await.unwrap();
        assert_eq!(scheduler.job("orders").unwrap().snapshot().generation, 1);

        // Scrapes read the cache.
        let text = exposition(&registry, scheduler.scrape().await);
        assert!(text.contains(r#"num_orders{site="foo"} 1"#));
        scheduler.scrape().await;
        assert_eq!(store.queries.load(Ordering::SeqCst), 1);

        scheduler.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_on_demand_pull_job_has_no_task() {
        let store = Arc::new(CountingStore::default());
        let scheduler = Scheduler::new(
            vec![job("orders").with_mode(Mode::Pull).with_interval(Duration::ZERO)],
            stores(store.clone()),
            gauge_sinks(),
        )
        .unwrap();

        scheduler.start(&Registry::new()).await.unwrap();
        assert_eq!(store.queries.load(Ordering::SeqCst), 0);

        scheduler.scrape().await;
        scheduler.scrape().await;
        assert_eq!(store.queries.load(Ordering::SeqCst), 2);
        scheduler.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_never_overlap() {
        let store = Arc::new(CountingStore {
            delay: Duration::from_millis(250),
            ..Default::default()
        });
        let scheduler = Scheduler::new(
            vec![job("orders").with_interval(Duration::from_millis(100))],
            stores(store.clone()),
            gauge_sinks(),
        )
        .unwrap();

        scheduler.start(&Registry::new()).await.unwrap();
        // An on-demand tick racing the background task waits its turn.
        let (ticked, ()) = tokio::join!(
            scheduler.job("orders").unwrap().tick(),
            tokio::time::sleep(Duration::from_secs(2)),
        );
        ticked.unwrap();

        scheduler.stop().await.unwrap();
        assert!(store.queries.load(Ordering::SeqCst) > 2);
        assert_eq!(store.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stop_closes_each_store_once() {
        let shared = Arc::new(CountingStore::default());
        let other = Arc::new(StaticStore::parse("1,foo").unwrap());
        let stores: HashMap<String, Arc<dyn Store>> = HashMap::from([
            ("primary".to_string(), shared.clone() as Arc<dyn Store>),
            ("alias".to_string(), shared.clone() as Arc<dyn Store>),
            ("static".to_string(), other.clone() as Arc<dyn Store>),
        ]);
        let jobs = vec![
            JobSpec::new("a", "primary", "SELECT 1")
                .with_sinks(["num_orders"])
                .with_interval(Duration::from_secs(60)),
            JobSpec::new("b", "alias", "SELECT 1")
                .with_sinks(["num_orders"])
                .with_interval(Duration::from_secs(60)),
        ];
        let scheduler = Scheduler::new(jobs, stores, gauge_sinks()).unwrap();

        scheduler.start(&Registry::new()).await.unwrap();
        scheduler.stop().await.unwrap();

        assert_eq!(shared.closes.load(Ordering::SeqCst), 1);
        assert!(other.is_closed());
        assert_eq!(scheduler.state(), SchedulerState::Stopped);

        let err = scheduler.stop().await.unwrap_err();
        assert!(matches!(
            err,
            CollectorError::Lifecycle {
                actual: SchedulerState::Stopped,
                ..
            }
        ));
        assert_eq!(shared.closes.load(Ordering::SeqCst), 1);

        // Restarting a stopped scheduler is not possible either.
        assert!(scheduler.start(&Registry::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_failed_tick_keeps_previous_value() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let store: Arc<dyn Store> = Arc::new(StaticStore::new(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                crate::store::parse_rows("42,foo")
            } else {
                Err(StoreError::InvalidRows("down".to_string()))
            }
        }));
        let scheduler = Scheduler::new(vec![job("orders")], stores(store), gauge_sinks()).unwrap();
        let registry = Registry::new();

        scheduler.start(&registry).await.unwrap();
        assert!(scheduler.job("orders").unwrap().tick().await.is_err());
        assert!(exposition(&registry, Vec::new()).contains(r#"num_orders{site="foo"} 42"#));
        scheduler.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_waits_for_in_flight_query() {
        let store = Arc::new(SlowSecondQueryStore::default());
        let scheduler = Scheduler::new(
            vec![job("orders").with_interval(Duration::from_secs(1))],
            stores(store.clone()),
            gauge_sinks(),
        )
        .unwrap();
        let registry = Registry::new();

        scheduler.start(&registry).await.unwrap();
        // The second tick starts at 1s and is still querying at 1.5s.
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(store.queries.load(Ordering::SeqCst), 2);
        assert_eq!(store.completed.load(Ordering::SeqCst), 1);

        let before = Instant::now();
        scheduler.stop().await.unwrap();
        assert!(before.elapsed() >= Duration::from_secs(4));

        assert_eq!(store.completed.load(Ordering::SeqCst), 2);
        assert_eq!(store.completed_at_close.load(Ordering::SeqCst), 2);
        assert_eq!(store.queries.load(Ordering::SeqCst), 2);
        assert!(exposition(&registry, Vec::new()).contains(r#"num_orders{site="foo"} 2"#));
    }

    #[tokio::test(start_paused = true)]
    async fn test_nan_counter_row_skipped_and_job_keeps_ticking() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let store: Arc<dyn Store> = Arc::new(StaticStore::new(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                crate::store::parse_rows("1,foo")
            } else {
                crate::store::parse_rows("NaN,foo")
            }
        }));
        let spec = SinkSpec::new("orders_total", SinkKind::Counter).with_labels(["site"]);
        let sinks: SinkSet = [Sink::new(spec).unwrap()].into_iter().collect();
        let scheduler = Scheduler::new(
            vec![
                job("orders")
                    .with_sinks(["orders_total"])
                    .with_interval(Duration::from_secs(1)),
            ],
            stores(store),
            sinks,
        )
        .unwrap();
        let registry = Registry::new();

        scheduler.start(&registry).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5500)).await;
        assert!(calls.load(Ordering::SeqCst) > 3);
        assert!(exposition(&registry, Vec::new()).contains(r#"orders_total{site="foo"} 1"#));

        scheduler.stop().await.unwrap();
    }
}
