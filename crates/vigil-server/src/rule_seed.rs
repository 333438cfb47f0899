//! Built-in rule set used when the configuration names no rules.

use tracing::{info, warn};
use vigil_alerts::{
    AlertCategory, AlertEngine, AlertSeverity, ComparisonOperator, RuleDefinition,
};

#[allow(clippy::too_many_arguments)]
fn definition(
    id: &str,
    name: &str,
    category: AlertCategory,
    severity: AlertSeverity,
    metric: &str,
    operator: ComparisonOperator,
    threshold: f64,
    message: &str,
    cooldown_seconds: u64,
) -> RuleDefinition {
    RuleDefinition {
        id: id.to_string(),
        name: name.to_string(),
        category,
        severity,
        metric: metric.to_string(),
        operator,
        threshold,
        title_template: None,
        message_template: message.to_string(),
        cooldown_seconds,
        auto_resolve: false,
        ttl_seconds: None,
    }
}

/// The default rules.
#[must_use]
pub fn default_rules() -> Vec<RuleDefinition> {
    vec![
        definition(
            "high-response-time",
            "High response time",
            AlertCategory::Performance,
            AlertSeverity::High,
            "responseTime",
            ComparisonOperator::GreaterThan,
            2000.0,
            "Average response time is ${responseTime}ms",
            300,
        ),
        definition(
            "high-error-rate",
            "High error rate",
            AlertCategory::Performance,
            AlertSeverity::Critical,
            "errorRate",
            ComparisonOperator::GreaterThan,
            5.0,
            "Error rate is ${errorRate}%",
            300,
        ),
        definition(
            "high-cpu",
            "High CPU usage",
            AlertCategory::System,
            AlertSeverity::High,
            "cpuUsage",
            ComparisonOperator::GreaterThan,
            90.0,
            "CPU usage is ${cpuUsage}%",
            600,
        ),
        definition(
            "high-memory",
            "High memory usage",
            AlertCategory::System,
            AlertSeverity::High,
            "memoryUsage",
            ComparisonOperator::GreaterThan,
            90.0,
            "Memory usage is ${memoryUsage}%",
            600,
        ),
        definition(
            "failed-logins",
            "Failed login attempts",
            AlertCategory::Security,
            AlertSeverity::Critical,
            "failedLogins",
            ComparisonOperator::GreaterThanOrEqual,
            10.0,
            "${failedLogins} failed logins from ${ip}",
            60,
        ),
        RuleDefinition {
            auto_resolve: true,
            ttl_seconds: Some(3600),
            ..definition(
                "revenue-drop",
                "Revenue drop",
                AlertCategory::Business,
                AlertSeverity::Medium,
                "revenueChange",
                ComparisonOperator::LessThan,
                -20.0,
                "Revenue changed by ${revenueChange}% against the previous period",
                3600,
            )
        },
    ]
}

/// Registers `definitions` with the engine. Invalid definitions are logged
/// and skipped. Returns the number registered.
pub fn register_rules(engine: &AlertEngine, definitions: Vec<RuleDefinition>) -> usize {
    let mut registered = 0;
    for definition in definitions {
        let id = definition.id.clone();
        match definition.into_rule() {
            Ok(rule) => {
                engine.add_rule(rule);
                registered += 1;
            }
            Err(e) => warn!(rule_id = %id, error = %e, "Skipping invalid rule"),
        }
    }
    info!(count = registered, "Rules registered");
    registered
}
