//! Metric payloads handed to rule conditions.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// An opaque sample of metrics: string keys mapped to arbitrary JSON values.
///
/// Payloads are produced by metric sources, read by conditions and templates,
/// and retained verbatim as alert metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricPayload(Map<String, Value>);

impl MetricPayload {
    /// Creates an empty payload.
    #[must_use]
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Adds a value, returning the payload for chaining.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Inserts a value, replacing any previous value for the key.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Returns the raw value for a key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Returns the value for a key as a float, if it is numeric.
    #[must_use]
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.0.get(key).and_then(Value::as_f64)
    }

    /// Returns the value for a key as a string slice, if it is a string.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Returns true if the key is present.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Number of keys in the payload.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the payload has no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over key/value pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Copies every entry of `other` in, replacing values for existing keys.
    pub fn merge(&mut self, other: Self) {
        self.0.extend(other.0);
    }

    /// Parses a payload from a JSON object string.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::SerializationError` if the text is not a JSON object.
    pub fn from_json(text: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

impl From<Map<String, Value>> for MetricPayload {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl FromIterator<(String, Value)> for MetricPayload {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
