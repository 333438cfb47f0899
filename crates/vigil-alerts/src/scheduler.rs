//! Periodic metric collection and rule evaluation.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::evaluator::RuleEvaluator;
use crate::payload::MetricPayload;
use crate::rules::RuleScope;
use crate::types::AlertCategory;

/// Future returned by [`MetricSource::collect`].
pub type CollectFuture<'a> = Pin<Box<dyn Future<Output = Result<MetricPayload>> + Send + 'a>>;

/// Produces metric payloads for one alert category.
pub trait MetricSource: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Category whose rules the payload is evaluated against.
    fn category(&self) -> AlertCategory;

    /// Samples the current metrics.
    ///
    /// # Errors
    ///
    /// Returns an error if sampling fails. The category is skipped for that
    /// tick.
    fn collect(&self) -> CollectFuture<'_>;
}

/// Drives evaluation of every registered source on a fixed period.
pub struct Scheduler {
    evaluator: RuleEvaluator,
    sources: Vec<Arc<dyn MetricSource>>,
    period: Duration,
}

impl Scheduler {
    /// Creates a scheduler ticking every `period`.
    #[must_use]
    pub fn new(evaluator: RuleEvaluator, period: Duration) -> Self {
        Self {
            evaluator,
            sources: Vec::new(),
            period,
        }
    }

    /// Adds a metric source.
    #[must_use]
    pub fn with_source(mut self, source: Arc<dyn MetricSource>) -> Self {
        self.sources.push(source);
        self
    }

    /// Adds several metric sources.
    #[must_use]
    pub fn with_sources(mut self, sources: impl IntoIterator<Item = Arc<dyn MetricSource>>) -> Self {
        self.sources.extend(sources);
        self
    }

    /// The tick period.
    #[must_use]
    pub const fn period(&self) -> Duration {
        self.period
    }

    /// Number of registered sources.
    #[must_use]
    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Runs one tick: collects from each source in turn and evaluates the
    /// rules of its category. Empty payloads are not evaluated. Returns how
    /// many alerts were created.
    pub async fn run_tick(&self) -> usize {
        let mut created = 0;
        for source in &self.sources {
            let category = source.category();
            match source.collect().await {
                Ok(payload) if payload.is_empty() => {
                    debug!(source = source.name(), %category, "Source had nothing to report");
                }
                Ok(payload) => {
                    let alerts = self
                        .evaluator
                        .evaluate(&payload, &RuleScope::Category(category));
                    debug!(source = source.name(), %category, created = alerts.len(), "Source evaluated");
                    created += alerts.len();
                }
                Err(e) => {
                    warn!(source = source.name(), %category, error = %e, "Metric collection failed, skipping");
                }
            }
        }
        created
    }

    /// Spawns the tick loop.
    ///
    /// Ticks run inline so they never overlap, and missed ticks are skipped.
    /// When `shutdown` becomes true the loop stops issuing ticks; a tick that
    /// is already running completes first.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let period = self.period;
        let this = Arc::new(self);
        spawn_periodic("scheduler", period, shutdown, move || {
            let this = Arc::clone(&this);
            async move {
                this.run_tick().await;
            }
        })
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("sources", &self.sources.iter().map(|s| s.name()).collect::<Vec<_>>())
            .field("period", &self.period)
            .finish_non_exhaustive()
    }
}

/// Spawns a loop that runs `task` every `period` until `shutdown` is true.
///
/// The first run happens immediately. Each run is awaited before the next
/// tick is considered.
pub fn spawn_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    task: F,
) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        // `interval` panics on a zero period.
        let period = period.max(Duration::from_millis(1));
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(task = name, period_ms = period.as_millis() as u64, "Periodic task started");

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {
                    task().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!(task = name, "Periodic task stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::condition::ThresholdCondition;
    use crate::cooldown::CooldownTracker;
    use crate::error::AlertError;
    use crate::events::EventPublisher;
    use crate::rules::{AlertRule, RuleRegistry};
    use crate::store::AlertStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedSource {
        category: AlertCategory,
        payload: MetricPayload,
        calls: AtomicUsize,
    }

    impl FixedSource {
        fn new(category: AlertCategory, payload: MetricPayload) -> Self {
            Self {
                category,
                payload,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl MetricSource for FixedSource {
        fn name(&self) -> &str {
            "fixed"
        }

        fn category(&self) -> AlertCategory {
            self.category
        }

        fn collect(&self) -> CollectFuture<'_> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                Ok(self.payload.clone())
            })
        }
    }

    struct FailingSource;

    impl MetricSource for FailingSource {
        fn name(&self) -> &str {
            "failing"
        }

        fn category(&self) -> AlertCategory {
            AlertCategory::System
        }

        fn collect(&self) -> CollectFuture<'_> {
            Box::pin(async {
                Err(AlertError::CollectionFailed {
                    category: "system".to_string(),
                    reason: "probe offline".to_string(),
                })
            })
        }
    }

    fn evaluator(store: Arc<AlertStore>, rules: Arc<RuleRegistry>) -> RuleEvaluator {
        let (events, _rx) = EventPublisher::channel(64);
        RuleEvaluator::new(
            rules,
            Arc::new(CooldownTracker::new()),
            store,
            events,
            Arc::new(SystemClock),
        )
    }

    fn rule(id: &str, category: AlertCategory, metric: &str) -> AlertRule {
        AlertRule::builder(id, id, category, ThresholdCondition::above(metric, 10.0))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn tick_evaluates_only_source_category() {
        let store = Arc::new(AlertStore::new());
        let rules = Arc::new(RuleRegistry::new());
        rules.register(rule("perf", AlertCategory::Performance, "value"));
        rules.register(rule("sys", AlertCategory::System, "value"));

        let scheduler = Scheduler::new(evaluator(store.clone(), rules), Duration::from_secs(1))
            .with_source(Arc::new(FixedSource::new(
                AlertCategory::Performance,
                MetricPayload::new().with("value", 50),
            )));

        assert_eq!(scheduler.run_tick().await, 1);
        let active = store.list_active(None);
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].category, AlertCategory::Performance);
    }

    #[tokio::test]
    async fn failing_source_skips_only_its_category() {
        let store = Arc::new(AlertStore::new());
        let rules = Arc::new(RuleRegistry::new());
        rules.register(rule("sys", AlertCategory::System, "value"));
        rules.register(rule("biz", AlertCategory::Business, "value"));

        let scheduler = Scheduler::new(evaluator(store.clone(), rules), Duration::from_secs(1))
            .with_sources([
                Arc::new(FailingSource) as Arc<dyn MetricSource>,
                Arc::new(FixedSource::new(
                    AlertCategory::Business,
                    MetricPayload::new().with("value", 50),
                )),
            ]);

        assert_eq!(scheduler.run_tick().await, 1);
        assert_eq!(store.list_active(Some(AlertCategory::Business)).len(), 1);
        assert!(store.list_active(Some(AlertCategory::System)).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn loop_ticks_on_period_and_stops_on_shutdown() {
        let source = Arc::new(FixedSource::new(AlertCategory::Info, MetricPayload::new()));
        let scheduler = Scheduler::new(
            evaluator(Arc::new(AlertStore::new()), Arc::new(RuleRegistry::new())),
            Duration::from_secs(10),
        )
        .with_source(source.clone());

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = scheduler.spawn(shutdown_rx);

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_run_completes_before_stop() {
        let finished = Arc::new(AtomicUsize::new(0));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let counter = finished.clone();
        let handle = spawn_periodic("slow", Duration::from_secs(60), shutdown_rx, move || {
            let counter = counter.clone();
            async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_payload_is_not_evaluated() {
        let store = Arc::new(AlertStore::new());
        let rules = Arc::new(RuleRegistry::new());
        rules.register(
            AlertRule::builder("any", "any", AlertCategory::Info, crate::condition::from_fn(|_| true))
                .build()
                .unwrap(),
        );
        let source = Arc::new(FixedSource::new(AlertCategory::Info, MetricPayload::new()));
        let scheduler = Scheduler::new(evaluator(store.clone(), rules), Duration::from_secs(1))
            .with_source(source.clone());

        assert_eq!(scheduler.run_tick().await, 0);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert!(store.list_active(None).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn zero_period_keeps_ticking() {
        let ran = Arc::new(AtomicUsize::new(0));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let counter = ran.clone();
        let handle = spawn_periodic("zero", Duration::ZERO, shutdown_rx, move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
        assert!(ran.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn shutdown_before_start_never_ticks() {
        let ran = Arc::new(AtomicUsize::new(0));
        let (_tx, rx) = watch::channel(true);
        let counter = ran.clone();
        spawn_periodic("noop", Duration::from_secs(1), rx, move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        })
        .await
        .unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }
}
