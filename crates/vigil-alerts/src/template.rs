//! `${key}` placeholder rendering for rule titles and messages.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::Value;

use crate::payload::MetricPayload;

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([^}]+)\}").unwrap_or_else(|_| unreachable!()));

/// Substitutes every `${key}` token with the payload value for `key`.
///
/// String values are inserted without quotes; other values use their JSON
/// text. Tokens whose key is absent are left verbatim.
#[must_use]
pub fn render(template: &str, payload: &MetricPayload) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures<'_>| match payload.get(&caps[1]) {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => caps[0].to_string(),
        })
        .into_owned()
}
