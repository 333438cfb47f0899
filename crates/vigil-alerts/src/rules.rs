//! Alert rules and the rule registry.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::condition::{ComparisonOperator, Condition, ThresholdCondition};
use crate::error::{AlertError, Result};
use crate::types::{AlertCategory, AlertSeverity};

/// A rule that materializes an alert when its condition holds.
#[derive(Clone)]
pub struct AlertRule {
    /// Unique identifier. Cooldowns are keyed by it.
    pub id: String,
    /// Human-readable name, recorded as the alert `source`.
    pub name: String,
    /// Category of the alerts this rule creates.
    pub category: AlertCategory,
    /// Severity of the alerts this rule creates.
    pub severity: AlertSeverity,
    /// The predicate.
    pub condition: Arc<dyn Condition>,
    /// Title with `${key}` placeholders.
    pub title_template: String,
    /// Message with `${key}` placeholders.
    pub message_template: String,
    /// Minimum seconds between two firings.
    pub cooldown_secs: u64,
    /// Whether created alerts resolve themselves.
    pub auto_resolve: bool,
    /// Lifetime of created alerts when `auto_resolve` is set.
    pub ttl_secs: Option<u64>,
}

impl AlertRule {
    /// Maximum allowed length for rule names.
    pub const MAX_NAME_LENGTH: usize = 256;

    /// Creates a new alert rule builder.
    pub fn builder(
        id: impl Into<String>,
        name: impl Into<String>,
        category: AlertCategory,
        condition: impl Condition + 'static,
    ) -> AlertRuleBuilder {
        AlertRuleBuilder::new(id.into(), name.into(), category, Arc::new(condition))
    }

    /// Returns the TTL applied to created alerts, if they auto-resolve.
    #[must_use]
    pub fn effective_ttl(&self) -> Option<u64> {
        if self.auto_resolve {
            self.ttl_secs.filter(|&ttl| ttl > 0)
        } else {
            None
        }
    }
}

impl fmt::Debug for AlertRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlertRule")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("category", &self.category)
            .field("severity", &self.severity)
            .field("condition", &self.condition.describe())
            .field("cooldown_secs", &self.cooldown_secs)
            .field("auto_resolve", &self.auto_resolve)
            .field("ttl_secs", &self.ttl_secs)
            .finish_non_exhaustive()
    }
}

/// Builder for creating [`AlertRule`] instances.
pub struct AlertRuleBuilder {
    id: String,
    name: String,
    category: AlertCategory,
    condition: Arc<dyn Condition>,
    severity: AlertSeverity,
    title_template: Option<String>,
    message_template: String,
    cooldown_secs: u64,
    auto_resolve: bool,
    ttl_secs: Option<u64>,
}

impl AlertRuleBuilder {
    fn new(
        id: String,
        name: String,
        category: AlertCategory,
        condition: Arc<dyn Condition>,
    ) -> Self {
        Self {
            id,
            name,
            category,
            condition,
            severity: AlertSeverity::default(),
            title_template: None,
            message_template: String::new(),
            cooldown_secs: 0,
            auto_resolve: false,
            ttl_secs: None,
        }
    }

    /// Sets the severity level.
    #[must_use]
    pub const fn severity(mut self, severity: AlertSeverity) -> Self {
        self.severity = severity;
        self
    }

    /// Sets the title template. Defaults to the rule name.
    #[must_use]
    pub fn title(mut self, template: impl Into<String>) -> Self {
        self.title_template = Some(template.into());
        self
    }

    /// Sets the message template.
    #[must_use]
    pub fn message(mut self, template: impl Into<String>) -> Self {
        self.message_template = template.into();
        self
    }

    /// Sets the cooldown in seconds.
    #[must_use]
    pub const fn cooldown_secs(mut self, secs: u64) -> Self {
        self.cooldown_secs = secs;
        self
    }

    /// Makes created alerts resolve themselves after `ttl_secs`.
    #[must_use]
    pub const fn auto_resolve(mut self, ttl_secs: u64) -> Self {
        self.auto_resolve = true;
        self.ttl_secs = Some(ttl_secs);
        self
    }

    /// Builds the [`AlertRule`].
    ///
    /// # Errors
    ///
    /// Returns `AlertError::InvalidRule` if:
    /// - The id is empty
    /// - The name is empty
    /// - The name exceeds the maximum length
    /// - Auto-resolve is set with a TTL of zero
    pub fn build(self) -> Result<AlertRule> {
        if self.id.trim().is_empty() {
            return Err(AlertError::InvalidRule {
                reason: "rule id cannot be empty".to_string(),
            });
        }

        if self.name.is_empty() {
            return Err(AlertError::InvalidRule {
                reason: "rule name cannot be empty".to_string(),
            });
        }

        if self.name.len() > AlertRule::MAX_NAME_LENGTH {
            return Err(AlertError::InvalidRule {
                reason: format!(
                    "rule name exceeds maximum length of {} characters",
                    AlertRule::MAX_NAME_LENGTH
                ),
            });
        }

        check_ttl(&self.id, self.auto_resolve, self.ttl_secs)?;

        Ok(AlertRule {
            title_template: self.title_template.unwrap_or_else(|| self.name.clone()),
            id: self.id,
            name: self.name,
            category: self.category,
            severity: self.severity,
            condition: self.condition,
            message_template: self.message_template,
            cooldown_secs: self.cooldown_secs,
            auto_resolve: self.auto_resolve,
            ttl_secs: self.ttl_secs,
        })
    }
}

fn check_ttl(id: &str, auto_resolve: bool, ttl_secs: Option<u64>) -> Result<()> {
    if auto_resolve && ttl_secs == Some(0) {
        return Err(AlertError::InvalidRule {
            reason: format!("ttl for auto-resolving rule '{id}' must be greater than 0"),
        });
    }
    Ok(())
}

/// Which rules an evaluation pass considers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RuleScope {
    /// Every registered rule.
    #[default]
    All,
    /// Every rule of one category.
    Category(AlertCategory),
    /// An explicit id subset. Unknown ids are ignored.
    Ids(Vec<String>),
}

/// The set of registered rules, ordered by id.
#[derive(Default)]
pub struct RuleRegistry {
    rules: RwLock<BTreeMap<String, Arc<AlertRule>>>,
}

impl RuleRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a rule, replacing any rule with the same id.
    ///
    /// Returns the replaced rule, if any.
    pub fn register(&self, rule: AlertRule) -> Option<Arc<AlertRule>> {
        let id = rule.id.clone();
        let previous = self.rules.write().insert(id.clone(), Arc::new(rule));
        if previous.is_some() {
            info!(rule_id = %id, "Replaced alert rule");
        } else {
            info!(rule_id = %id, "Registered alert rule");
        }
        previous
    }

    /// Removes a rule by id.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::RuleNotFound` if no rule has that id.
    pub fn remove(&self, id: &str) -> Result<Arc<AlertRule>> {
        let removed = self.rules.write().remove(id);
        match removed {
            Some(rule) => {
                info!(rule_id = %id, "Removed alert rule");
                Ok(rule)
            }
            None => Err(AlertError::RuleNotFound { id: id.to_string() }),
        }
    }

    /// Returns a rule by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<AlertRule>> {
        self.rules.read().get(id).cloned()
    }

    /// Returns every rule in ascending id order.
    #[must_use]
    pub fn list(&self) -> Vec<Arc<AlertRule>> {
        self.rules.read().values().cloned().collect()
    }

    /// Returns the rules in `scope`, in ascending id order.
    #[must_use]
    pub fn select(&self, scope: &RuleScope) -> Vec<Arc<AlertRule>> {
        let rules = self.rules.read();
        let selected: Vec<_> = match scope {
            RuleScope::All => rules.values().cloned().collect(),
            RuleScope::Category(category) => rules
                .values()
                .filter(|r| r.category == *category)
                .cloned()
                .collect(),
            RuleScope::Ids(ids) => {
                let mut wanted: Vec<&String> = ids.iter().collect();
                wanted.sort();
                wanted.dedup();
                wanted
                    .into_iter()
                    .filter_map(|id| rules.get(id).cloned())
                    .collect()
            }
        };
        debug!(?scope, count = selected.len(), "Selected rules");
        selected
    }

    /// Number of registered rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.read().len()
    }

    /// Returns true if no rules are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.read().is_empty()
    }
}

impl fmt::Debug for RuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleRegistry")
            .field("rules", &self.len())
            .finish()
    }
}

/// A data-driven rule as it appears in configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleDefinition {
    /// Rule id.
    pub id: String,
    /// Rule name.
    pub name: String,
    /// Alert category.
    #[serde(rename = "type")]
    pub category: AlertCategory,
    /// Alert severity.
    #[serde(default)]
    pub severity: AlertSeverity,
    /// Payload key compared against the threshold.
    pub metric: String,
    /// Comparison operator.
    pub operator: ComparisonOperator,
    /// Threshold value.
    pub threshold: f64,
    /// Title template. Defaults to the name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title_template: Option<String>,
    /// Message template.
    #[serde(default)]
    pub message_template: String,
    /// Cooldown in seconds.
    #[serde(default)]
    pub cooldown_seconds: u64,
    /// Whether created alerts resolve themselves.
    #[serde(default)]
    pub auto_resolve: bool,
    /// Lifetime of auto-resolving alerts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_seconds: Option<u64>,
}

impl RuleDefinition {
    /// Converts the definition into a rule with a threshold condition.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::InvalidRule` if the rule fails validation or the
    /// threshold is not finite.
    pub fn into_rule(self) -> Result<AlertRule> {
        if !self.threshold.is_finite() {
            return Err(AlertError::InvalidRule {
                reason: format!("threshold for rule '{}' must be finite", self.id),
            });
        }

        let condition = ThresholdCondition::new(self.metric, self.operator, self.threshold);
        let mut builder = AlertRule::builder(self.id, self.name, self.category, condition)
            .severity(self.severity)
            .message(self.message_template)
            .cooldown_secs(self.cooldown_seconds);
        if let Some(title) = self.title_template {
            builder = builder.title(title);
        }
        let mut rule = builder.build()?;
        check_ttl(&rule.id, self.auto_resolve, self.ttl_seconds)?;
        rule.auto_resolve = self.auto_resolve;
        rule.ttl_secs = self.ttl_seconds;
        Ok(rule)
    }
}
