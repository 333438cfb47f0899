//! The alert engine.
//!
//! [`AlertEngine`] wires the rule registry, cooldown tracker, alert store,
//! subscription registry and action dispatcher together and owns their
//! lifecycle. It is the entry point for everything outside this crate.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::actions::{ActionDispatcher, ActionOutcome, ActionRequest};
use crate::broadcast::{Broadcaster, ClientId, SubscriptionFilter, SubscriptionRegistry};
use crate::clock::{Clock, SystemClock};
use crate::cooldown::CooldownTracker;
use crate::error::{AlertError, Result};
use crate::evaluator::RuleEvaluator;
use crate::events::{EngineEvent, EventPublisher};
use crate::payload::MetricPayload;
use crate::protocol::OutboundMessage;
use crate::rules::{AlertRule, RuleRegistry, RuleScope};
use crate::scheduler::{MetricSource, Scheduler, spawn_periodic};
use crate::store::AlertStore;
use crate::types::{Alert, AlertCategory, AlertStats};

/// Configuration for the alert engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How often the scheduler collects metrics and evaluates rules (in seconds).
    pub evaluation_interval_secs: u64,
    /// How often expired alerts are swept (in seconds).
    pub sweep_interval_secs: u64,
    /// Capacity of the internal event queue feeding the broadcaster.
    pub event_queue_capacity: usize,
    /// Unread action requests kept per listener.
    pub action_request_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            evaluation_interval_secs: 30,
            sweep_interval_secs: 5,
            event_queue_capacity: 1024,
            action_request_capacity: 256,
        }
    }
}

impl EngineConfig {
    /// Sets the evaluation interval.
    #[must_use]
    pub const fn with_evaluation_interval_secs(mut self, secs: u64) -> Self {
        self.evaluation_interval_secs = secs;
        self
    }

    /// Sets the sweep interval.
    #[must_use]
    pub const fn with_sweep_interval_secs(mut self, secs: u64) -> Self {
        self.sweep_interval_secs = secs;
        self
    }

    /// Sets the event queue capacity.
    #[must_use]
    pub const fn with_event_queue_capacity(mut self, capacity: usize) -> Self {
        self.event_queue_capacity = capacity;
        self
    }

    /// Sets the action request capacity.
    #[must_use]
    pub const fn with_action_request_capacity(mut self, capacity: usize) -> Self {
        self.action_request_capacity = capacity;
        self
    }

    /// Evaluation interval as a [`Duration`].
    #[must_use]
    pub const fn evaluation_interval(&self) -> Duration {
        Duration::from_secs(self.evaluation_interval_secs)
    }

    /// Sweep interval as a [`Duration`].
    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns a message naming the first invalid field.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.evaluation_interval_secs == 0 {
            return Err("evaluation_interval_secs must be greater than 0".to_string());
        }
        if self.sweep_interval_secs == 0 {
            return Err("sweep_interval_secs must be greater than 0".to_string());
        }
        if self.event_queue_capacity == 0 {
            return Err("event_queue_capacity must be greater than 0".to_string());
        }
        if self.action_request_capacity == 0 {
            return Err("action_request_capacity must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Reply to [`AlertEngine::resolve_alert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolveResponse {
    /// Whether an active alert was resolved.
    pub success: bool,
}

/// Reply to [`AlertEngine::trigger_alert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerResponse {
    /// Whether the alert was accepted.
    pub success: bool,
}

/// The alert engine.
///
/// Every operation is synchronous and safe to call from any task; background
/// work only starts with [`AlertEngine::start`].
pub struct AlertEngine {
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    rules: Arc<RuleRegistry>,
    cooldowns: Arc<CooldownTracker>,
    store: Arc<AlertStore>,
    subscriptions: Arc<SubscriptionRegistry>,
    events: EventPublisher,
    event_rx: Mutex<Option<mpsc::Receiver<EngineEvent>>>,
    evaluator: RuleEvaluator,
    dispatcher: ActionDispatcher,
}

impl AlertEngine {
    /// Creates an engine using the system clock.
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Creates an engine reading time from `clock`.
    #[must_use]
    pub fn with_clock(config: EngineConfig, clock: Arc<dyn Clock>) -> Self {
        Self::with_components(
            config,
            clock,
            Arc::new(RuleRegistry::new()),
            Arc::new(AlertStore::new()),
            Arc::new(SubscriptionRegistry::new()),
        )
    }

    /// Creates an engine over existing components.
    #[must_use]
    pub fn with_components(
        config: EngineConfig,
        clock: Arc<dyn Clock>,
        rules: Arc<RuleRegistry>,
        store: Arc<AlertStore>,
        subscriptions: Arc<SubscriptionRegistry>,
    ) -> Self {
        let (events, event_rx) = EventPublisher::channel(config.event_queue_capacity);
        let cooldowns = Arc::new(CooldownTracker::new());
        let evaluator = RuleEvaluator::new(
            Arc::clone(&rules),
            Arc::clone(&cooldowns),
            Arc::clone(&store),
            events.clone(),
            Arc::clone(&clock),
        );
        let dispatcher = ActionDispatcher::new(
            Arc::clone(&store),
            events.clone(),
            config.action_request_capacity,
        );
        Self {
            config,
            clock,
            rules,
            cooldowns,
            store,
            subscriptions,
            events,
            event_rx: Mutex::new(Some(event_rx)),
            evaluator,
            dispatcher,
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ============ Rules ============

    /// Registers a rule, replacing any rule with the same id. The rule's
    /// cooldown state is kept across replacement.
    pub fn add_rule(&self, rule: AlertRule) {
        self.rules.register(rule);
    }

    /// Removes a rule.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::RuleNotFound` if no rule has that id.
    pub fn remove_rule(&self, id: &str) -> Result<()> {
        self.rules.remove(id).map(|_| ())
    }

    /// Returns every rule in id order.
    #[must_use]
    pub fn rules(&self) -> Vec<Arc<AlertRule>> {
        self.rules.list()
    }

    /// Evaluates rules in `scope` against `payload`, returning new alerts.
    pub fn evaluate(&self, payload: &MetricPayload, scope: &RuleScope) -> Vec<Alert> {
        self.evaluator.evaluate(payload, scope)
    }

    // ============ Alerts ============

    /// Active alerts, newest first, optionally limited to one category.
    #[must_use]
    pub fn get_active_alerts(&self, category: Option<AlertCategory>) -> Vec<Alert> {
        self.store.list_active(category)
    }

    /// Returns an active alert.
    #[must_use]
    pub fn get_alert(&self, id: &str) -> Option<Alert> {
        self.store.get(id)
    }

    /// Resolves an alert. Resolving an unknown or already resolved alert
    /// reports `success: false` and has no effect.
    pub fn resolve_alert(&self, id: &str) -> ResolveResponse {
        ResolveResponse {
            success: self.dispatcher.resolve(id).is_some(),
        }
    }

    /// Aggregate counts over active alerts.
    #[must_use]
    pub fn get_alert_stats(&self) -> AlertStats {
        self.store.stats()
    }

    /// Injects an externally produced alert.
    ///
    /// The alert bypasses rules and cooldowns. It is rejected if an alert
    /// with the same id is already active.
    pub fn trigger_alert(&self, alert: Alert) -> TriggerResponse {
        let alert_id = alert.id.clone();
        match self.store.insert(alert.clone()) {
            Ok(()) => {
                info!(alert_id = %alert_id, category = %alert.category, "Alert triggered");
                self.events.publish(EngineEvent::AlertCreated(alert));
                TriggerResponse { success: true }
            }
            Err(e) => {
                warn!(alert_id = %alert_id, error = %e, "Rejected triggered alert");
                TriggerResponse { success: false }
            }
        }
    }

    /// Resolves every alert whose TTL has elapsed and notifies subscribers.
    pub fn sweep_expired(&self) -> Vec<Alert> {
        let expired = self.store.sweep_expired(self.clock.now());
        for alert in &expired {
            debug!(alert_id = %alert.id, "Alert expired");
            self.events.publish(EngineEvent::resolved(alert));
        }
        expired
    }

    // ============ Clients ============

    /// Handles `action` on `alert_id` for a client.
    pub fn handle_action(
        &self,
        client_id: Option<ClientId>,
        alert_id: &str,
        action: &str,
    ) -> ActionOutcome {
        self.dispatcher.handle(client_id, alert_id, action)
    }

    /// Listens for custom actions requested by clients.
    #[must_use]
    pub fn action_requests(&self) -> broadcast::Receiver<ActionRequest> {
        self.dispatcher.subscribe_requests()
    }

    /// Connects a client. Its queue first receives a snapshot of every
    /// active alert, then every event of the categories it subscribes to
    /// (all categories until it subscribes).
    pub fn connect_client(&self, tx: mpsc::Sender<OutboundMessage>) -> Option<ClientId> {
        self.subscriptions
            .connect(tx, || self.store.list_active(None))
    }

    /// Replaces a client's subscription.
    pub fn subscribe_client(&self, client_id: ClientId, filter: SubscriptionFilter) -> bool {
        self.subscriptions.subscribe(client_id, filter)
    }

    /// Removes all state for a client.
    pub fn disconnect_client(&self, client_id: ClientId) -> bool {
        self.subscriptions.unsubscribe(client_id)
    }

    /// Number of connected clients.
    #[must_use]
    pub fn client_count(&self) -> usize {
        self.subscriptions.client_count()
    }

    // ============ Lifecycle ============

    /// Starts the background tasks: the event pump feeding the broadcaster,
    /// the scheduler over `sources`, and the expiry sweeper.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::InvalidConfig` if the engine config fails
    /// [`EngineConfig::validate`], and `AlertError::AlreadyStarted` if called
    /// more than once.
    pub fn start(self: &Arc<Self>, sources: Vec<Arc<dyn MetricSource>>) -> Result<EngineHandle> {
        self.config
            .validate()
            .map_err(|reason| AlertError::InvalidConfig { reason })?;
        let event_rx = self.event_rx.lock().take().ok_or(AlertError::AlreadyStarted)?;

        let (ticks_tx, ticks_rx) = watch::channel(false);
        let (pump_tx, pump_rx) = watch::channel(false);

        let broadcaster: Arc<dyn Broadcaster> = self.subscriptions.clone();
        let pump = spawn_pump(event_rx, broadcaster, pump_rx);

        let scheduler = Scheduler::new(self.evaluator.clone(), self.config.evaluation_interval())
            .with_sources(sources);
        let source_count = scheduler.source_count();
        let scheduler = scheduler.spawn(ticks_rx.clone());

        let engine = Arc::clone(self);
        let sweeper = spawn_periodic("sweeper", self.config.sweep_interval(), ticks_rx, move || {
            engine.sweep_expired();
            std::future::ready(())
        });

        info!(
            sources = source_count,
            rules = self.rules.len(),
            evaluation_interval_secs = self.config.evaluation_interval_secs,
            sweep_interval_secs = self.config.sweep_interval_secs,
            "Alert engine started"
        );

        Ok(EngineHandle {
            ticks_tx,
            pump_tx,
            workers: vec![scheduler, sweeper],
            pump,
        })
    }
}

impl std::fmt::Debug for AlertEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertEngine")
            .field("config", &self.config)
            .field("rules", &self.rules.len())
            .field("active_alerts", &self.store.len())
            .field("cooldowns", &self.cooldowns.len())
            .field("clients", &self.subscriptions.client_count())
            .finish_non_exhaustive()
    }
}

/// Controls the background tasks of a started engine.
#[derive(Debug)]
pub struct EngineHandle {
    ticks_tx: watch::Sender<bool>,
    pump_tx: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
    pump: JoinHandle<()>,
}

impl EngineHandle {
    /// Stops the engine.
    ///
    /// The scheduler and sweeper stop first, letting an in-flight tick
    /// complete. The event pump then delivers whatever is still queued and
    /// exits.
    pub async fn shutdown(self) {
        let _ = self.ticks_tx.send(true);
        for worker in self.workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "Engine task failed");
            }
        }

        let _ = self.pump_tx.send(true);
        if let Err(e) = self.pump.await {
            warn!(error = %e, "Event pump failed");
        }
        info!("Alert engine stopped");
    }
}

fn spawn_pump(
    mut rx: mpsc::Receiver<EngineEvent>,
    broadcaster: Arc<dyn Broadcaster>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                event = rx.recv() => match event {
                    Some(event) => {
                        broadcaster.broadcast(event);
                    }
                    None => break,
                },
                _ = shutdown.changed() => {
                    while let Ok(event) = rx.try_recv() {
                        broadcaster.broadcast(event);
                    }
                    break;
                }
            }
        }
        debug!("Event pump stopped");
    })
}
