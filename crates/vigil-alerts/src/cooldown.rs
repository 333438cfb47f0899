//! Per-rule cooldown tracking.

use std::collections::HashMap;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;

/// Last firing time per rule id.
///
/// Entries are keyed purely by rule id, so replacing a rule keeps its
/// cooldown. Entries are never removed.
#[derive(Debug, Default)]
pub struct CooldownTracker {
    last_fired: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl CooldownTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if `rule_id` fired less than `cooldown_secs` before `now`.
    #[must_use]
    pub fn is_cooling_down(&self, rule_id: &str, cooldown_secs: u64, now: DateTime<Utc>) -> bool {
        let last_fired = self.last_fired.lock();
        last_fired
            .get(rule_id)
            .is_some_and(|last| within(*last, cooldown_secs, now))
    }

    /// Records a firing at `now` unless the rule is still cooling down.
    ///
    /// The check and the update happen under one lock, so two concurrent
    /// evaluations of the same rule cannot both claim it.
    pub fn try_claim(&self, rule_id: &str, cooldown_secs: u64, now: DateTime<Utc>) -> bool {
        let mut last_fired = self.last_fired.lock();
        if last_fired
            .get(rule_id)
            .is_some_and(|last| within(*last, cooldown_secs, now))
        {
            return false;
        }
        last_fired.insert(rule_id.to_string(), now);
        true
    }

    /// Returns when `rule_id` last fired.
    #[must_use]
    pub fn last_fired(&self, rule_id: &str) -> Option<DateTime<Utc>> {
        self.last_fired.lock().get(rule_id).copied()
    }

    /// Number of rules that have fired at least once.
    #[must_use]
    pub fn len(&self) -> usize {
        self.last_fired.lock().len()
    }

    /// Returns true if nothing has fired yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.last_fired.lock().is_empty()
    }
}

fn within(last: DateTime<Utc>, cooldown_secs: u64, now: DateTime<Utc>) -> bool {
    // Cooldowns too large for a `TimeDelta` never elapse.
    i64::try_from(cooldown_secs)
        .ok()
        .and_then(ChronoDuration::try_seconds)
        .is_none_or(|cooldown| now.signed_duration_since(last) < cooldown)
}
