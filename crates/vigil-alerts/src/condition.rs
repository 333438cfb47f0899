//! Rule conditions.
//!
//! A [`Condition`] is a predicate over a [`MetricPayload`]. Closures are
//! wrapped with [`from_fn`]; data-driven rules use [`ThresholdCondition`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{AlertError, Result};
use crate::payload::MetricPayload;

/// A predicate deciding whether a rule fires for a payload.
///
/// Implementations may fail; the evaluator treats an error (or a panic) as
/// "did not fire" for that cycle.
pub trait Condition: Send + Sync {
    /// Evaluates the condition against a payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be interpreted.
    fn evaluate(&self, payload: &MetricPayload) -> Result<bool>;

    /// Human-readable description used in logs.
    fn describe(&self) -> String {
        "custom condition".to_string()
    }
}

/// A condition backed by a closure.
pub struct FnCondition<F> {
    f: F,
    description: String,
}

impl<F> FnCondition<F> {
    /// Sets the description reported in logs.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

impl<F> fmt::Debug for FnCondition<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnCondition")
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

impl<F> Condition for FnCondition<F>
where
    F: Fn(&MetricPayload) -> bool + Send + Sync,
{
    fn evaluate(&self, payload: &MetricPayload) -> Result<bool> {
        Ok((self.f)(payload))
    }

    fn describe(&self) -> String {
        self.description.clone()
    }
}

/// Wraps an infallible closure as a [`Condition`].
#[must_use]
pub fn from_fn<F>(f: F) -> FnCondition<F>
where
    F: Fn(&MetricPayload) -> bool + Send + Sync,
{
    FnCondition {
        f,
        description: "custom condition".to_string(),
    }
}

/// Comparison operators for threshold conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComparisonOperator {
    /// Greater than (>).
    #[serde(rename = ">")]
    GreaterThan,
    /// Greater than or equal (>=).
    #[serde(rename = ">=")]
    GreaterThanOrEqual,
    /// Less than (<).
    #[serde(rename = "<")]
    LessThan,
    /// Less than or equal (<=).
    #[serde(rename = "<=")]
    LessThanOrEqual,
    /// Equal (==).
    #[serde(rename = "==")]
    Equal,
    /// Not equal (!=).
    #[serde(rename = "!=")]
    NotEqual,
}

impl ComparisonOperator {
    /// Applies the operator as `left <op> right`.
    #[must_use]
    pub fn compare(&self, left: f64, right: f64) -> bool {
        match self {
            Self::GreaterThan => left > right,
            Self::GreaterThanOrEqual => left >= right,
            Self::LessThan => left < right,
            Self::LessThanOrEqual => left <= right,
            Self::Equal => (left - right).abs() < f64::EPSILON,
            Self::NotEqual => (left - right).abs() >= f64::EPSILON,
        }
    }

    /// Returns the operator symbol.
    #[must_use]
    pub const fn as_symbol(&self) -> &'static str {
        match self {
            Self::GreaterThan => ">",
            Self::GreaterThanOrEqual => ">=",
            Self::LessThan => "<",
            Self::LessThanOrEqual => "<=",
            Self::Equal => "==",
            Self::NotEqual => "!=",
        }
    }
}

impl fmt::Display for ComparisonOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_symbol())
    }
}

/// Compares one numeric payload key against a fixed threshold.
///
/// A missing key does not fire. A present but non-numeric value is an
/// evaluation error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdCondition {
    /// Payload key to read.
    pub metric: String,
    /// How to compare.
    pub operator: ComparisonOperator,
    /// Value to compare against.
    pub threshold: f64,
}

impl ThresholdCondition {
    /// Creates a threshold condition.
    #[must_use]
    pub fn new(metric: impl Into<String>, operator: ComparisonOperator, threshold: f64) -> Self {
        Self {
            metric: metric.into(),
            operator,
            threshold,
        }
    }

    /// `metric > threshold`.
    #[must_use]
    pub fn above(metric: impl Into<String>, threshold: f64) -> Self {
        Self::new(metric, ComparisonOperator::GreaterThan, threshold)
    }

    /// `metric < threshold`.
    #[must_use]
    pub fn below(metric: impl Into<String>, threshold: f64) -> Self {
        Self::new(metric, ComparisonOperator::LessThan, threshold)
    }
}

impl Condition for ThresholdCondition {
    fn evaluate(&self, payload: &MetricPayload) -> Result<bool> {
        let Some(raw) = payload.get(&self.metric) else {
            return Ok(false);
        };
        let value = raw.as_f64().ok_or_else(|| AlertError::EvaluationError {
            reason: format!("metric '{}' is not numeric: {raw}", self.metric),
        })?;
        Ok(self.operator.compare(value, self.threshold))
    }

    fn describe(&self) -> String {
        format!("{} {} {}", self.metric, self.operator, self.threshold)
    }
}
