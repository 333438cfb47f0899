//! Built-in metric probes.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use sysinfo::System;
use tracing::debug;
use vigil_alerts::{
    AlertCategory, AlertEngine, AlertError, CollectFuture, MetricPayload, MetricSource,
};

use crate::config::ProbeConfig;
use crate::ingest::MetricIngest;

/// Builds the metric sources `config` enables.
///
/// With ingestion on, every category also gets a queue fed by
/// `reportMetrics` messages; the returned [`MetricIngest`] is its sending
/// side.
#[must_use]
pub fn configured_sources(
    config: &ProbeConfig,
    engine: &Arc<AlertEngine>,
) -> (Vec<Arc<dyn MetricSource>>, Option<MetricIngest>) {
    let mut sources: Vec<Arc<dyn MetricSource>> = Vec::new();
    if config.system {
        sources.push(Arc::new(SystemProbe::new()));
    }
    if config.performance {
        sources.push(Arc::new(PerformanceProbe::new(engine)));
    }

    let ingest = config.ingest.then(|| {
        let (ingest, queues) =
            MetricIngest::channel(&AlertCategory::ALL, config.ingest_queue_capacity);
        sources.extend(queues.into_iter().map(|q| Arc::new(q) as Arc<dyn MetricSource>));
        ingest
    });
    (sources, ingest)
}

/// Rounds to one decimal place so values read well in alert messages.
fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Samples host CPU, memory and load average.
///
/// Reports `cpuUsage` (percent), `memoryUsage` (percent), `loadAverage`
/// (one minute) and `usedMemoryMb` under the `system` category.
#[derive(Debug, Clone)]
pub struct SystemProbe {
    system: Arc<Mutex<System>>,
}

impl SystemProbe {
    /// Create a probe. The first CPU reading is relative to this call.
    #[must_use]
    pub fn new() -> Self {
        let mut system = System::new_all();
        system.refresh_all();
        Self {
            system: Arc::new(Mutex::new(system)),
        }
    }

    fn sample(system: &Mutex<System>) -> MetricPayload {
        let mut sys = system.lock();
        sys.refresh_cpu_usage();
        sys.refresh_memory();

        let load = System::load_average();
        let total_mem = sys.total_memory() as f64;
        let used_mem = sys.used_memory() as f64;
        let memory_usage = if total_mem > 0.0 {
            (used_mem / total_mem) * 100.0
        } else {
            0.0
        };

        MetricPayload::new()
            .with("cpuUsage", round1(f64::from(sys.global_cpu_usage())))
            .with("memoryUsage", round1(memory_usage))
            .with("loadAverage", load.one)
            .with("usedMemoryMb", round1(used_mem / 1024.0 / 1024.0))
    }
}

impl Default for SystemProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricSource for SystemProbe {
    fn name(&self) -> &str {
        "system"
    }

    fn category(&self) -> AlertCategory {
        AlertCategory::System
    }

    fn collect(&self) -> CollectFuture<'_> {
        let system = Arc::clone(&self.system);
        Box::pin(async move {
            let payload = tokio::task::spawn_blocking(move || Self::sample(&system))
                .await
                .map_err(|e| AlertError::CollectionFailed {
                    category: AlertCategory::System.to_string(),
                    reason: e.to_string(),
                })?;
            debug!(metrics = payload.len(), "Sampled system metrics");
            Ok(payload)
        })
    }
}

/// Reports the engine's own load: `connectedClients` and `activeAlerts`
/// under the `performance` category.
#[derive(Debug, Clone)]
pub struct PerformanceProbe {
    engine: Weak<AlertEngine>,
}

impl PerformanceProbe {
    /// Create a probe observing `engine`.
    #[must_use]
    pub fn new(engine: &Arc<AlertEngine>) -> Self {
        Self {
            engine: Arc::downgrade(engine),
        }
    }
}

impl MetricSource for PerformanceProbe {
    fn name(&self) -> &str {
        "performance"
    }

    fn category(&self) -> AlertCategory {
        AlertCategory::Performance
    }

    fn collect(&self) -> CollectFuture<'_> {
        Box::pin(async move {
            let engine = self.engine.upgrade().ok_or_else(|| AlertError::CollectionFailed {
                category: AlertCategory::Performance.to_string(),
                reason: "engine dropped".to_string(),
            })?;
            Ok(MetricPayload::new()
                .with("connectedClients", engine.client_count())
                .with("activeAlerts", engine.get_alert_stats().total))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use tokio::sync::mpsc;
    use vigil_alerts::{
        Alert, AlertSeverity, ComparisonOperator, EngineConfig, RuleDefinition, RuleScope,
    };

    use crate::rule_seed::{default_rules, register_rules};

    /// A value that satisfies the rule's comparison.
    fn crossing(def: &RuleDefinition) -> f64 {
        match def.operator {
            ComparisonOperator::GreaterThan
            | ComparisonOperator::GreaterThanOrEqual
            | ComparisonOperator::NotEqual => def.threshold + 1.0,
            ComparisonOperator::LessThan | ComparisonOperator::LessThanOrEqual => {
                def.threshold - 1.0
            }
            ComparisonOperator::Equal => def.threshold,
        }
    }

    #[tokio::test]
    async fn test_every_default_rule_has_a_source() {
        let engine = Arc::new(AlertEngine::new(EngineConfig::default()));
        let (sources, ingest) = configured_sources(&ProbeConfig::default(), &engine);
        let ingest = ingest.unwrap();

        let mut sampled: HashMap<AlertCategory, MetricPayload> = HashMap::new();
        for source in &sources {
            let payload = source.collect().await.unwrap();
            sampled.entry(source.category()).or_default().merge(payload);
        }

        for def in default_rules() {
            let sampled_here = sampled
                .get(&def.category)
                .is_some_and(|p| p.contains_key(&def.metric));
            assert!(
                sampled_here || ingest.accepts(def.category),
                "nothing produces {} for rule {}",
                def.metric,
                def.id
            );
        }
    }

    #[tokio::test]
    async fn test_reported_metrics_fire_default_rules() {
        let engine = Arc::new(AlertEngine::new(EngineConfig::default()));
        let defs = default_rules();
        register_rules(&engine, defs.clone());

        let config = ProbeConfig {
            system: false,
            performance: false,
            ..ProbeConfig::default()
        };
        let (sources, ingest) = configured_sources(&config, &engine);
        assert_eq!(sources.len(), AlertCategory::ALL.len());
        let ingest = ingest.unwrap();

        for def in &defs {
            ingest
                .submit(def.category, MetricPayload::new().with(def.metric.clone(), crossing(def)))
                .unwrap();
        }
        for source in &sources {
            let payload = source.collect().await.unwrap();
            if !payload.is_empty() {
                engine.evaluate(&payload, &RuleScope::Category(source.category()));
            }
        }

        let fired: HashSet<String> = engine
            .get_active_alerts(None)
            .into_iter()
            .map(|a| a.source)
            .collect();
        for def in &defs {
            assert!(fired.contains(&def.name), "rule {} did not fire", def.id);
        }
    }

    #[test]
    fn test_sources_follow_config() {
        let engine = Arc::new(AlertEngine::new(EngineConfig::default()));
        let config = ProbeConfig {
            system: false,
            ingest: false,
            ..ProbeConfig::default()
        };
        let (sources, ingest) = configured_sources(&config, &engine);
        assert!(ingest.is_none());
        let names: Vec<&str> = sources.iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["performance"]);
    }

    #[test]
    fn test_round1() {
        assert!((round1(12.345) - 12.3).abs() < f64::EPSILON);
        assert!((round1(99.96) - 100.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_system_probe_reports_percentages() {
        let probe = SystemProbe::new();
        assert_eq!(probe.category(), AlertCategory::System);

        let payload = probe.collect().await.unwrap();
        let memory = payload.get_f64("memoryUsage").unwrap();
        assert!((0.0..=100.0).contains(&memory));
        assert!(payload.get_f64("cpuUsage").unwrap() >= 0.0);
        assert!(payload.contains_key("loadAverage"));
    }

    #[tokio::test]
    async fn test_performance_probe_counts() {
        let engine = Arc::new(AlertEngine::new(EngineConfig::default()));
        let probe = PerformanceProbe::new(&engine);

        let (tx, _rx) = mpsc::channel(4);
        engine.connect_client(tx).unwrap();
        engine.trigger_alert(Alert::new(
            AlertCategory::Info,
            AlertSeverity::Low,
            "t",
            "m",
            "s",
        ));

        let payload = probe.collect().await.unwrap();
        assert_eq!(payload.get_f64("connectedClients"), Some(1.0));
        assert_eq!(payload.get_f64("activeAlerts"), Some(1.0));
    }

    #[tokio::test]
    async fn test_performance_probe_without_engine() {
        let engine = Arc::new(AlertEngine::new(EngineConfig::default()));
        let probe = PerformanceProbe::new(&engine);
        drop(engine);

        assert!(matches!(
            probe.collect().await,
            Err(AlertError::CollectionFailed { .. })
        ));
    }
}
