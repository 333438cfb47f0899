//! Rule evaluation.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::cooldown::CooldownTracker;
use crate::events::{EngineEvent, EventPublisher};
use crate::payload::MetricPayload;
use crate::rules::{AlertRule, RuleRegistry, RuleScope};
use crate::store::AlertStore;
use crate::template::render;
use crate::types::Alert;

/// Evaluates rules against payloads and materializes alerts.
#[derive(Clone)]
pub struct RuleEvaluator {
    rules: Arc<RuleRegistry>,
    cooldowns: Arc<CooldownTracker>,
    store: Arc<AlertStore>,
    events: EventPublisher,
    clock: Arc<dyn Clock>,
}

impl RuleEvaluator {
    /// Creates an evaluator over shared components.
    #[must_use]
    pub fn new(
        rules: Arc<RuleRegistry>,
        cooldowns: Arc<CooldownTracker>,
        store: Arc<AlertStore>,
        events: EventPublisher,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            rules,
            cooldowns,
            store,
            events,
            clock,
        }
    }

    /// Evaluates every rule in `scope` against `payload`, in ascending id
    /// order.
    ///
    /// Rules that are cooling down are skipped. A condition that errors or
    /// panics counts as not firing and does not affect other rules. Each
    /// fired rule yields an alert that is stored, queued for broadcast and
    /// returned.
    pub fn evaluate(&self, payload: &MetricPayload, scope: &RuleScope) -> Vec<Alert> {
        let rules = self.rules.select(scope);
        let mut created = Vec::new();

        for rule in rules {
            if let Some(alert) = self.evaluate_rule(&rule, payload) {
                created.push(alert);
            }
        }

        if !created.is_empty() {
            info!(count = created.len(), "Rules fired");
        }
        created
    }

    fn evaluate_rule(&self, rule: &AlertRule, payload: &MetricPayload) -> Option<Alert> {
        let now = self.clock.now();
        if self.cooldowns.is_cooling_down(&rule.id, rule.cooldown_secs, now) {
            debug!(rule_id = %rule.id, "Rule cooling down, skipped");
            return None;
        }

        match catch_unwind(AssertUnwindSafe(|| rule.condition.evaluate(payload))) {
            Ok(Ok(true)) => {}
            Ok(Ok(false)) => return None,
            Ok(Err(e)) => {
                warn!(rule_id = %rule.id, error = %e, "Condition failed, treating as not firing");
                return None;
            }
            Err(panic) => {
                error!(
                    rule_id = %rule.id,
                    panic = %panic_message(panic.as_ref()),
                    "Condition panicked, treating as not firing"
                );
                return None;
            }
        }

        if !self.cooldowns.try_claim(&rule.id, rule.cooldown_secs, now) {
            debug!(rule_id = %rule.id, "Rule claimed by a concurrent evaluation");
            return None;
        }

        let mut alert = Alert::new(
            rule.category,
            rule.severity,
            render(&rule.title_template, payload),
            render(&rule.message_template, payload),
            rule.name.clone(),
        )
        .with_created_at(now)
        .with_metadata(payload.clone());
        if let Some(ttl) = rule.effective_ttl() {
            alert = alert.with_ttl(ttl);
        }

        if let Err(e) = self.store.insert(alert.clone()) {
            warn!(rule_id = %rule.id, error = %e, "Failed to store alert");
            return None;
        }

        info!(
            rule_id = %rule.id,
            alert_id = %alert.id,
            category = %alert.category,
            severity = %alert.severity,
            "Alert fired"
        );
        self.events.publish(EngineEvent::AlertCreated(alert.clone()));
        Some(alert)
    }
}

impl std::fmt::Debug for RuleEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleEvaluator")
            .field("rules", &self.rules)
            .field("cooldowns", &self.cooldowns.len())
            .field("store", &self.store.len())
            .finish_non_exhaustive()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::condition::{ThresholdCondition, from_fn};
    use crate::types::{AlertCategory, AlertSeverity};
    use tokio::sync::mpsc;

    struct Harness {
        evaluator: RuleEvaluator,
        rules: Arc<RuleRegistry>,
        store: Arc<AlertStore>,
        clock: ManualClock,
        events: mpsc::Receiver<EngineEvent>,
    }

    fn harness() -> Harness {
        let rules = Arc::new(RuleRegistry::new());
        let store = Arc::new(AlertStore::new());
        let clock = ManualClock::default();
        let (publisher, events) = EventPublisher::channel(64);
        let evaluator = RuleEvaluator::new(
            rules.clone(),
            Arc::new(CooldownTracker::new()),
            store.clone(),
            publisher,
            Arc::new(clock.clone()),
        );
        Harness {
            evaluator,
            rules,
            store,
            clock,
            events,
        }
    }

    fn slow_response_rule() -> AlertRule {
        AlertRule::builder(
            "r1",
            "High response time",
            AlertCategory::Performance,
            ThresholdCondition::above("responseTime", 2000.0),
        )
        .severity(AlertSeverity::High)
        .title("Slow: ${responseTime}ms")
        .message("Response time ${responseTime}ms on ${endpoint}")
        .cooldown_secs(300)
        .build()
        .unwrap()
    }

    #[test]
    fn fires_and_renders() {
        let mut h = harness();
        h.rules.register(slow_response_rule());

        let payload = MetricPayload::new().with("responseTime", 2500);
        let created = h.evaluator.evaluate(&payload, &RuleScope::All);

        assert_eq!(created.len(), 1);
        let alert = &created[0];
        assert_eq!(alert.title, "Slow: 2500ms");
        assert_eq!(alert.message, "Response time 2500ms on ${endpoint}");
        assert_eq!(alert.source, "High response time");
        assert_eq!(alert.severity, AlertSeverity::High);
        assert_eq!(alert.metadata, payload);
        assert_eq!(alert.created_at, h.clock.now());
        assert!(h.store.contains(&alert.id));
        assert_eq!(
            h.events.try_recv().unwrap(),
            EngineEvent::AlertCreated(alert.clone())
        );
    }

    #[test]
    fn below_threshold_does_not_fire() {
        let h = harness();
        h.rules.register(slow_response_rule());
        let payload = MetricPayload::new().with("responseTime", 1000);
        assert!(h.evaluator.evaluate(&payload, &RuleScope::All).is_empty());
        assert!(h.store.is_empty());
    }

    #[test]
    fn cooldown_suppresses_until_elapsed() {
        let h = harness();
        h.rules.register(slow_response_rule());
        let payload = MetricPayload::new().with("responseTime", 2500);

        assert_eq!(h.evaluator.evaluate(&payload, &RuleScope::All).len(), 1);
        h.clock.advance_secs(10);
        assert!(h.evaluator.evaluate(&payload, &RuleScope::All).is_empty());
        h.clock.advance_secs(290);
        assert_eq!(h.evaluator.evaluate(&payload, &RuleScope::All).len(), 1);
        assert_eq!(h.store.len(), 2);
    }

    #[test]
    fn non_firing_evaluation_does_not_start_cooldown() {
        let h = harness();
        h.rules.register(slow_response_rule());

        let cold = MetricPayload::new().with("responseTime", 1000);
        let hot = MetricPayload::new().with("responseTime", 2500);
        assert!(h.evaluator.evaluate(&cold, &RuleScope::All).is_empty());
        assert_eq!(h.evaluator.evaluate(&hot, &RuleScope::All).len(), 1);
    }

    #[test]
    fn replacing_rule_keeps_cooldown() {
        let h = harness();
        h.rules.register(slow_response_rule());
        let payload = MetricPayload::new().with("responseTime", 2500);
        assert_eq!(h.evaluator.evaluate(&payload, &RuleScope::All).len(), 1);

        h.rules.register(slow_response_rule());
        h.clock.advance_secs(1);
        assert!(h.evaluator.evaluate(&payload, &RuleScope::All).is_empty());
    }

    #[test]
    fn failing_and_panicking_conditions_are_isolated() {
        let h = harness();
        h.rules.register(
            AlertRule::builder(
                "a-errors",
                "errors",
                AlertCategory::System,
                ThresholdCondition::above("cpu", 90.0),
            )
            .build()
            .unwrap(),
        );
        h.rules.register(
            AlertRule::builder(
                "b-panics",
                "panics",
                AlertCategory::System,
                from_fn(|_| panic!("boom")),
            )
            .build()
            .unwrap(),
        );
        h.rules.register(
            AlertRule::builder("c-fires", "fires", AlertCategory::System, from_fn(|_| true))
                .build()
                .unwrap(),
        );

        let payload = MetricPayload::new().with("cpu", "not a number");
        let created = h.evaluator.evaluate(&payload, &RuleScope::All);
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].source, "fires");
    }

    #[test]
    fn scope_limits_rules() {
        let h = harness();
        h.rules.register(slow_response_rule());
        h.rules.register(
            AlertRule::builder("sec", "sec", AlertCategory::Security, from_fn(|_| true))
                .build()
                .unwrap(),
        );

        let payload = MetricPayload::new().with("responseTime", 2500);
        let created = h
            .evaluator
            .evaluate(&payload, &RuleScope::Category(AlertCategory::Security));
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].category, AlertCategory::Security);

        let created = h
            .evaluator
            .evaluate(&payload, &RuleScope::Ids(vec!["r1".to_string()]));
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].category, AlertCategory::Performance);
    }

    #[test]
    fn auto_resolving_rule_sets_ttl() {
        let h = harness();
        h.rules.register(
            AlertRule::builder("ttl", "ttl", AlertCategory::Info, from_fn(|_| true))
                .auto_resolve(60)
                .build()
                .unwrap(),
        );
        let created = h.evaluator.evaluate(&MetricPayload::new(), &RuleScope::All);
        assert!(created[0].auto_resolve);
        assert_eq!(created[0].ttl_seconds, Some(60));
    }

    #[test]
    fn panic_messages_are_extracted() {
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned"));
        let borrowed: Box<dyn Any + Send> = Box::new("borrowed");
        assert_eq!(panic_message(owned.as_ref()), "owned");
        assert_eq!(panic_message(borrowed.as_ref()), "borrowed");
    }
}
