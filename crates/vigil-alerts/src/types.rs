//! Core types for the alert engine.
//!
//! This module provides the fundamental types used throughout the vigil-alerts crate:
//! - [`AlertCategory`]: The kind of alert (performance, security, ...)
//! - [`AlertSeverity`]: The severity level of an alert
//! - [`AlertAction`]: A client-invocable action attached to an alert
//! - [`Alert`]: An active alert instance
//! - [`AlertStats`]: Aggregate counts over the active set

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::actions::default_actions;
use crate::error::AlertError;
use crate::payload::MetricPayload;

/// The category of an alert. Subscriptions filter on this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertCategory {
    /// Something is broken and needs immediate attention.
    Critical,
    /// Something looks wrong.
    Warning,
    /// Informational.
    Info,
    /// A positive event (deploy finished, target reached).
    Success,
    /// Latency, throughput and resource usage.
    Performance,
    /// Intrusion attempts, failed logins, suspicious traffic.
    Security,
    /// Revenue, conversion and other business KPIs.
    Business,
    /// Host and infrastructure health.
    System,
}

impl AlertCategory {
    /// Every category, in declaration order.
    pub const ALL: [Self; 8] = [
        Self::Critical,
        Self::Warning,
        Self::Info,
        Self::Success,
        Self::Performance,
        Self::Security,
        Self::Business,
        Self::System,
    ];

    /// Returns the category as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::Warning => "warning",
            Self::Info => "info",
            Self::Success => "success",
            Self::Performance => "performance",
            Self::Security => "security",
            Self::Business => "business",
            Self::System => "system",
        }
    }
}

impl std::fmt::Display for AlertCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AlertCategory {
    type Err = AlertError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| AlertError::UnknownCategory(s.to_string()))
    }
}

/// The severity level of an alert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    /// Worth knowing about.
    Low,
    /// Should be looked at.
    #[default]
    Medium,
    /// Needs attention soon.
    High,
    /// Requires immediate attention.
    Critical,
}

impl AlertSeverity {
    /// Returns the severity as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    /// Returns the priority of this severity (higher = more urgent).
    #[must_use]
    pub const fn priority(&self) -> u8 {
        match self {
            Self::Low => 1,
            Self::Medium => 2,
            Self::High => 3,
            Self::Critical => 4,
        }
    }
}

impl std::fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AlertSeverity {
    type Err = AlertError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(AlertError::UnknownSeverity(other.to_string())),
        }
    }
}

/// An action a client can invoke on an alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertAction {
    /// Button label shown to the user.
    pub label: String,
    /// Action name sent back by the client.
    pub action: String,
    /// Whether this is the primary action.
    #[serde(default)]
    pub primary: bool,
}

impl AlertAction {
    /// Creates a secondary action.
    #[must_use]
    pub fn new(label: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            action: action.into(),
            primary: false,
        }
    }

    /// Creates a primary action.
    #[must_use]
    pub fn primary(label: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            primary: true,
            ..Self::new(label, action)
        }
    }
}

/// An active alert instance.
///
/// Serialized in camelCase with the category under `type`, which is the
/// shape live clients consume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    /// Unique identifier for this alert instance.
    pub id: String,
    /// The category of the alert.
    #[serde(rename = "type")]
    pub category: AlertCategory,
    /// The severity of the alert.
    pub severity: AlertSeverity,
    /// Rendered title.
    pub title: String,
    /// Rendered message.
    pub message: String,
    /// Name of the rule (or external producer) that created the alert.
    pub source: String,
    /// When the alert was created.
    pub created_at: DateTime<Utc>,
    /// The payload that triggered the alert.
    #[serde(default)]
    pub metadata: MetricPayload,
    /// Actions offered to clients, in display order.
    #[serde(default)]
    pub actions: Vec<AlertAction>,
    /// Whether the alert resolves itself after `ttl_seconds`.
    #[serde(default)]
    pub auto_resolve: bool,
    /// Lifetime of the alert when `auto_resolve` is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_seconds: Option<u64>,
}

impl Alert {
    /// Creates an alert with a fresh id, the current time, and the default
    /// actions of its category.
    #[must_use]
    pub fn new(
        category: AlertCategory,
        severity: AlertSeverity,
        title: impl Into<String>,
        message: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            category,
            severity,
            title: title.into(),
            message: message.into(),
            source: source.into(),
            created_at: Utc::now(),
            metadata: MetricPayload::new(),
            actions: default_actions(category),
            auto_resolve: false,
            ttl_seconds: None,
        }
    }

    /// Sets the creation timestamp.
    #[must_use]
    pub const fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Sets the triggering payload.
    #[must_use]
    pub fn with_metadata(mut self, metadata: MetricPayload) -> Self {
        self.metadata = metadata;
        self
    }

    /// Replaces the action list.
    #[must_use]
    pub fn with_actions(mut self, actions: Vec<AlertAction>) -> Self {
        self.actions = actions;
        self
    }

    /// Makes the alert resolve itself after `ttl_seconds`.
    #[must_use]
    pub const fn with_ttl(mut self, ttl_seconds: u64) -> Self {
        self.auto_resolve = true;
        self.ttl_seconds = Some(ttl_seconds);
        self
    }

    /// Returns when the alert expires, if it auto-resolves. A TTL of zero
    /// counts as no TTL.
    #[must_use]
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        if !self.auto_resolve {
            return None;
        }
        let ttl = self.ttl_seconds.filter(|&ttl| ttl > 0)?;
        let ttl = i64::try_from(ttl).unwrap_or(i64::MAX);
        self.created_at
            .checked_add_signed(ChronoDuration::try_seconds(ttl)?)
    }

    /// Returns true if the alert has reached its expiry at `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().is_some_and(|at| now >= at)
    }

    /// Returns true if the alert offers the named action.
    #[must_use]
    pub fn has_action(&self, action: &str) -> bool {
        self.actions.iter().any(|a| a.action == action)
    }
}

/// Aggregate counts over the active alert set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertStats {
    /// Number of active alerts.
    pub total: usize,
    /// Counts keyed by severity name.
    pub by_severity: BTreeMap<String, usize>,
    /// Counts keyed by category name.
    pub by_type: BTreeMap<String, usize>,
}

impl AlertStats {
    /// Computes stats over a set of alerts.
    #[must_use]
    pub fn from_alerts<'a>(alerts: impl IntoIterator<Item = &'a Alert>) -> Self {
        let mut stats = Self::default();
        for alert in alerts {
            stats.total += 1;
            *stats
                .by_severity
                .entry(alert.severity.as_str().to_string())
                .or_default() += 1;
            *stats
                .by_type
                .entry(alert.category.as_str().to_string())
                .or_default() += 1;
        }
        stats
    }
}
