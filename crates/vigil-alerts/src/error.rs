//! Error types for the vigil-alerts crate.

use thiserror::Error;

/// Errors that can occur in the alert engine.
#[derive(Debug, Error)]
pub enum AlertError {
    /// Invalid alert rule configuration.
    #[error("invalid alert rule: {reason}")]
    InvalidRule {
        /// The reason the rule is invalid.
        reason: String,
    },

    /// Alert rule with the given id was not found.
    #[error("rule not found: {id}")]
    RuleNotFound {
        /// The rule id that was not found.
        id: String,
    },


    /// An alert with the same id is already active.
    #[error("alert already active: {id}")]
    DuplicateAlert {
        /// The conflicting alert id.
        id: String,
    },

    /// Failed to evaluate a rule condition.
    #[error("condition evaluation failed: {reason}")]
    EvaluationError {
        /// The reason the evaluation failed.
        reason: String,
    },

    /// A metric source failed to produce a payload.
    #[error("metric collection failed for {category}: {reason}")]
    CollectionFailed {
        /// Category the source samples.
        category: String,
        /// The reason collection failed.
        reason: String,
    },

    /// Unknown alert category name.
    #[error("unknown alert category: {0}")]
    UnknownCategory(String),

    /// Unknown alert severity name.
    #[error("unknown alert severity: {0}")]
    UnknownSeverity(String),

    /// Engine configuration rejected at start.
    #[error("invalid engine config: {reason}")]
    InvalidConfig {
        /// The reason the config is invalid.
        reason: String,
    },

    /// The engine has already been started.
    #[error("engine already started")]
    AlreadyStarted,

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    SerializationError(String),
}

impl From<serde_json::Error> for AlertError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

/// Result type for alert operations.
pub type Result<T> = std::result::Result<T, AlertError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_invalid_rule() {
        let err = AlertError::InvalidRule {
            reason: "empty name".to_string(),
        };
        assert_eq!(err.to_string(), "invalid alert rule: empty name");
    }

    #[test]
    fn error_display_invalid_config() {
        let err = AlertError::InvalidConfig {
            reason: "sweep_interval_secs must be greater than 0".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "invalid engine config: sweep_interval_secs must be greater than 0"
        );
    }

    #[test]
    fn error_display_collection_failed() {
        let err = AlertError::CollectionFailed {
            category: "system".to_string(),
            reason: "probe offline".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "metric collection failed for system: probe offline"
        );
    }

    #[test]
    fn error_display_unknown_category() {
        let err = AlertError::UnknownCategory("weather".to_string());
        assert_eq!(err.to_string(), "unknown alert category: weather");
    }

    #[test]
    fn error_from_serde_json() {
        let json_err = serde_json::from_str::<String>("invalid json");
        assert!(json_err.is_err());
        let alert_err: AlertError = json_err.unwrap_err().into();
        assert!(matches!(alert_err, AlertError::SerializationError(_)));
    }
}
