//! Rule-based real-time alert engine.
//!
//! `vigil-alerts` evaluates condition rules against sampled metric payloads,
//! keeps the resulting alerts in memory with cooldown and time-to-live
//! semantics, and fans alert events out to subscribed live clients.
//!
//! # Features
//!
//! - **Rules**: closure or threshold conditions with `${key}` title/message templates
//! - **Cooldowns**: per-rule suppression windows that survive rule replacement
//! - **TTL**: auto-resolving alerts removed by a periodic sweep
//! - **Subscriptions**: per-client category filters with a snapshot on connect
//! - **Actions**: `dismiss`/`mark_read` resolve; anything else is published to listeners
//! - **Scheduler**: non-overlapping periodic collection from [`MetricSource`]s
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use vigil_alerts::{
//!     AlertCategory, AlertEngine, AlertRule, AlertSeverity, EngineConfig, MetricPayload,
//!     RuleScope, ThresholdCondition,
//! };
//!
//! let engine = Arc::new(AlertEngine::new(EngineConfig::default()));
//!
//! let rule = AlertRule::builder(
//!     "high-response-time",
//!     "High response time",
//!     AlertCategory::Performance,
//!     ThresholdCondition::above("responseTime", 2000.0),
//! )
//! .severity(AlertSeverity::High)
//! .message("Average response time is ${responseTime}ms")
//! .cooldown_secs(300)
//! .build()
//! .unwrap();
//! engine.add_rule(rule);
//!
//! let payload = MetricPayload::new().with("responseTime", 2500);
//! let fired = engine.evaluate(&payload, &RuleScope::All);
//! assert_eq!(fired.len(), 1);
//! assert_eq!(fired[0].message, "Average response time is 2500ms");
//!
//! // Still cooling down.
//! assert!(engine.evaluate(&payload, &RuleScope::All).is_empty());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod actions;
pub mod broadcast;
pub mod clock;
pub mod condition;
pub mod cooldown;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod events;
pub mod payload;
pub mod protocol;
pub mod rules;
pub mod scheduler;
pub mod store;
pub mod template;
pub mod types;

// Re-export main types at crate root
pub use actions::{ActionDispatcher, ActionOutcome, ActionRequest, default_actions};
pub use broadcast::{
    ALL_CATEGORIES, Broadcaster, ClientId, DeliveryReport, SubscriptionFilter, SubscriptionRegistry,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use condition::{ComparisonOperator, Condition, FnCondition, ThresholdCondition, from_fn};
pub use cooldown::CooldownTracker;
pub use engine::{AlertEngine, EngineConfig, EngineHandle, ResolveResponse, TriggerResponse};
pub use error::{AlertError, Result};
pub use evaluator::RuleEvaluator;
pub use events::{EngineEvent, EventPublisher};
pub use payload::MetricPayload;
pub use protocol::{
    ALERT_NOT_FOUND, ClientMessage, ErrorReply, INVALID_MESSAGE_FORMAT, METRICS_REJECTED,
    OutboundMessage, ResolvedNotice, ServerMessage,
};
pub use rules::{AlertRule, AlertRuleBuilder, RuleDefinition, RuleRegistry, RuleScope};
pub use scheduler::{CollectFuture, MetricSource, Scheduler};
pub use store::AlertStore;
pub use types::{Alert, AlertAction, AlertCategory, AlertSeverity, AlertStats};
