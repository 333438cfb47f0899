//! The authoritative set of active alerts.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::error::{AlertError, Result};
use crate::types::{Alert, AlertCategory, AlertStats};

#[derive(Debug)]
struct StoredAlert {
    alert: Alert,
    expires_at: Option<DateTime<Utc>>,
    seq: u64,
}

#[derive(Debug, Default)]
struct Inner {
    alerts: HashMap<String, StoredAlert>,
    next_seq: u64,
}

/// Active alerts keyed by id.
///
/// Every operation takes the lock once, so each is atomic with respect to
/// the others. Callers only ever see clones.
#[derive(Debug, Default)]
pub struct AlertStore {
    inner: RwLock<Inner>,
}

impl AlertStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an alert to the active set.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::DuplicateAlert` if an alert with the same id is
    /// already active.
    pub fn insert(&self, alert: Alert) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.alerts.contains_key(&alert.id) {
            return Err(AlertError::DuplicateAlert { id: alert.id });
        }
        let seq = inner.next_seq;
        inner.next_seq += 1;
        let expires_at = alert.expires_at();
        debug!(alert_id = %alert.id, ?expires_at, "Stored alert");
        inner.alerts.insert(
            alert.id.clone(),
            StoredAlert {
                alert,
                expires_at,
                seq,
            },
        );
        Ok(())
    }

    /// Returns a clone of an active alert.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Alert> {
        self.inner.read().alerts.get(id).map(|s| s.alert.clone())
    }

    /// Returns true if the alert is active.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.inner.read().alerts.contains_key(id)
    }

    /// Removes an alert, returning it if it was active.
    pub fn take(&self, id: &str) -> Option<Alert> {
        self.inner.write().alerts.remove(id).map(|s| s.alert)
    }

    /// Removes an alert. Returns false if it was not active.
    pub fn resolve(&self, id: &str) -> bool {
        self.take(id).is_some()
    }

    /// Active alerts, newest first, optionally limited to one category.
    #[must_use]
    pub fn list_active(&self, category: Option<AlertCategory>) -> Vec<Alert> {
        let inner = self.inner.read();
        let mut entries: Vec<&StoredAlert> = inner
            .alerts
            .values()
            .filter(|s| category.is_none_or(|c| s.alert.category == c))
            .collect();
        entries.sort_by(|a, b| {
            b.alert
                .created_at
                .cmp(&a.alert.created_at)
                .then(b.seq.cmp(&a.seq))
        });
        entries.into_iter().map(|s| s.alert.clone()).collect()
    }

    /// Removes and returns every alert whose expiry is at or before `now`.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> Vec<Alert> {
        let mut inner = self.inner.write();
        let expired: Vec<String> = inner
            .alerts
            .iter()
            .filter(|(_, s)| s.expires_at.is_some_and(|at| at <= now))
            .map(|(id, _)| id.clone())
            .collect();

        let removed: Vec<Alert> = expired
            .iter()
            .filter_map(|id| inner.alerts.remove(id))
            .map(|s| s.alert)
            .collect();
        if !removed.is_empty() {
            info!(count = removed.len(), "Expired alerts resolved");
        }
        removed
    }

    /// Aggregate counts over the active set.
    #[must_use]
    pub fn stats(&self) -> AlertStats {
        let inner = self.inner.read();
        AlertStats::from_alerts(inner.alerts.values().map(|s| &s.alert))
    }

    /// Number of active alerts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().alerts.len()
    }

    /// Returns true if no alerts are active.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().alerts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AlertSeverity;
    use chrono::Duration as ChronoDuration;

    fn alert(category: AlertCategory, created_at: DateTime<Utc>) -> Alert {
        Alert::new(category, AlertSeverity::High, "t", "m", "rule").with_created_at(created_at)
    }

    #[test]
    fn insert_and_get() {
        let store = AlertStore::new();
        let a = alert(AlertCategory::System, Utc::now());
        store.insert(a.clone()).unwrap();
        assert_eq!(store.get(&a.id), Some(a));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn duplicate_insert_rejected() {
        let store = AlertStore::new();
        let a = alert(AlertCategory::System, Utc::now());
        store.insert(a.clone()).unwrap();
        assert!(matches!(
            store.insert(a),
            Err(AlertError::DuplicateAlert { .. })
        ));
    }

    #[test]
    fn resolve_is_idempotent() {
        let store = AlertStore::new();
        let a = alert(AlertCategory::Security, Utc::now());
        store.insert(a.clone()).unwrap();

        assert!(store.resolve(&a.id));
        assert!(!store.resolve(&a.id));
        assert!(store.list_active(None).is_empty());
    }

    #[test]
    fn list_newest_first_with_filter() {
        let store = AlertStore::new();
        let base = Utc::now();
        let old = alert(AlertCategory::System, base);
        let new = alert(AlertCategory::System, base + ChronoDuration::seconds(5));
        let other = alert(AlertCategory::Business, base + ChronoDuration::seconds(1));
        for a in [&old, &new, &other] {
            store.insert(a.clone()).unwrap();
        }

        let all: Vec<_> = store.list_active(None).into_iter().map(|a| a.id).collect();
        assert_eq!(all, vec![new.id.clone(), other.id.clone(), old.id.clone()]);

        let system: Vec<_> = store
            .list_active(Some(AlertCategory::System))
            .into_iter()
            .map(|a| a.id)
            .collect();
        assert_eq!(system, vec![new.id, old.id]);
    }

    #[test]
    fn same_timestamp_orders_by_insertion() {
        let store = AlertStore::new();
        let now = Utc::now();
        let first = alert(AlertCategory::Info, now);
        let second = alert(AlertCategory::Info, now);
        store.insert(first.clone()).unwrap();
        store.insert(second.clone()).unwrap();

        let ids: Vec<_> = store.list_active(None).into_iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![second.id, first.id]);
    }

    #[test]
    fn sweep_removes_only_expired() {
        let store = AlertStore::new();
        let now = Utc::now();
        let short = alert(AlertCategory::System, now).with_ttl(10);
        let long = alert(AlertCategory::System, now).with_ttl(100);
        let forever = alert(AlertCategory::System, now);
        for a in [&short, &long, &forever] {
            store.insert(a.clone()).unwrap();
        }

        assert!(store.sweep_expired(now + ChronoDuration::seconds(9)).is_empty());

        let swept = store.sweep_expired(now + ChronoDuration::seconds(10));
        assert_eq!(swept.len(), 1);
        assert_eq!(swept[0].id, short.id);
        assert_eq!(store.len(), 2);
        assert!(!store.contains(&short.id));
    }

    #[test]
    fn stats_reflect_active_set() {
        let store = AlertStore::new();
        let a = alert(AlertCategory::Security, Utc::now());
        store.insert(a.clone()).unwrap();
        store
            .insert(alert(AlertCategory::System, Utc::now()))
            .unwrap();
        store.resolve(&a.id);

        let stats = store.stats();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.by_type.get("system"), Some(&1));
        assert!(stats.by_type.get("security").is_none());
    }
}
