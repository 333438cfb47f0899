//! Client subscriptions and event fan-out.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::events::EngineEvent;
use crate::protocol::{OutboundMessage, ServerMessage};
use crate::types::{Alert, AlertCategory};

/// Subscription name that matches every category.
pub const ALL_CATEGORIES: &str = "all";

/// Identifier of a connected client session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClientId(Uuid);

impl ClientId {
    /// Generates a new random client id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The set of categories a client wants to hear about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SubscriptionFilter {
    /// Every category.
    #[default]
    All,
    /// Only these categories. Empty means nothing.
    Categories(BTreeSet<AlertCategory>),
}

impl SubscriptionFilter {
    /// Builds a filter from wire names. `"all"` anywhere in the list wins.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::UnknownCategory` for an unrecognised name.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self> {
        if names.iter().any(|n| n.as_ref() == ALL_CATEGORIES) {
            return Ok(Self::All);
        }
        let categories = names
            .iter()
            .map(|n| AlertCategory::from_str(n.as_ref()))
            .collect::<Result<BTreeSet<_>>>()?;
        Ok(Self::Categories(categories))
    }

    /// Returns true if an event of `category` should reach this client.
    #[must_use]
    pub fn matches(&self, category: AlertCategory) -> bool {
        match self {
            Self::All => true,
            Self::Categories(set) => set.contains(&category),
        }
    }
}

/// Outcome of one fan-out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Clients the event was queued for.
    pub delivered: usize,
    /// Clients whose delivery failed and who were unsubscribed.
    pub dropped: Vec<ClientId>,
}

impl DeliveryReport {
    /// Number of clients dropped by this fan-out.
    #[must_use]
    pub fn dropped_count(&self) -> usize {
        self.dropped.len()
    }
}

/// Fan-out of engine events to interested clients.
pub trait Broadcaster: Send + Sync {
    /// Replaces a client's interest set. Returns false for unknown clients.
    fn subscribe(&self, client_id: ClientId, filter: SubscriptionFilter) -> bool;

    /// Removes all state for a client. Returns false if it was not connected.
    fn unsubscribe(&self, client_id: ClientId) -> bool;

    /// Delivers an event to every matching client without blocking.
    fn broadcast(&self, event: EngineEvent) -> DeliveryReport;
}

#[derive(Debug)]
struct Subscriber {
    filter: SubscriptionFilter,
    tx: mpsc::Sender<OutboundMessage>,
    /// Alerts the client received in its snapshot whose creation event may
    /// still be queued.
    snapshot_ids: HashSet<String>,
}

impl Subscriber {
    /// Returns true if `event` announces an alert the snapshot already
    /// carried. Each id is consulted at most once.
    fn already_seen(&mut self, event: &EngineEvent) -> bool {
        if self.snapshot_ids.is_empty() {
            return false;
        }
        match event {
            EngineEvent::AlertCreated(alert) => self.snapshot_ids.remove(&alert.id),
            EngineEvent::AlertResolved { alert_id, .. } => {
                self.snapshot_ids.remove(alert_id);
                false
            }
        }
    }
}

/// Connected clients and their subscriptions.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    clients: RwLock<HashMap<ClientId, Subscriber>>,
}

impl SubscriptionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a client, first queueing the snapshot produced by `snapshot`.
    ///
    /// The snapshot is taken while the registry is write-locked, so no
    /// broadcast can reach the client before its snapshot and no alert
    /// created after the snapshot is missed. The client starts subscribed to
    /// every category. Creation events for alerts in the snapshot that are
    /// still queued are not delivered again.
    ///
    /// Returns `None` if the snapshot could not be queued.
    pub fn connect<F>(&self, tx: mpsc::Sender<OutboundMessage>, snapshot: F) -> Option<ClientId>
    where
        F: FnOnce() -> Vec<Alert>,
    {
        let client_id = ClientId::new();
        let mut clients = self.clients.write();
        let alerts = snapshot();
        let count = alerts.len();
        let snapshot_ids = alerts.iter().map(|a| a.id.clone()).collect();
        if let Err(e) = tx.try_send(ServerMessage::ActiveAlerts(alerts).into()) {
            warn!(client_id = %client_id, error = %e, "Failed to queue snapshot");
            return None;
        }
        clients.insert(
            client_id,
            Subscriber {
                filter: SubscriptionFilter::All,
                tx,
                snapshot_ids,
            },
        );
        info!(client_id = %client_id, snapshot = count, "Client connected");
        Some(client_id)
    }

    /// Returns a client's current filter.
    #[must_use]
    pub fn filter(&self, client_id: ClientId) -> Option<SubscriptionFilter> {
        self.clients
            .read()
            .get(&client_id)
            .map(|s| s.filter.clone())
    }

    /// Number of connected clients.
    #[must_use]
    pub fn client_count(&self) -> usize {
        self.clients.read().len()
    }
}

impl Broadcaster for SubscriptionRegistry {
    fn subscribe(&self, client_id: ClientId, filter: SubscriptionFilter) -> bool {
        let mut clients = self.clients.write();
        match clients.get_mut(&client_id) {
            Some(subscriber) => {
                debug!(client_id = %client_id, ?filter, "Subscription updated");
                subscriber.filter = filter;
                true
            }
            None => false,
        }
    }

    fn unsubscribe(&self, client_id: ClientId) -> bool {
        let removed = self.clients.write().remove(&client_id).is_some();
        if removed {
            info!(client_id = %client_id, "Client unsubscribed");
        }
        removed
    }

    fn broadcast(&self, event: EngineEvent) -> DeliveryReport {
        let category = event.category();
        let mut report = DeliveryReport::default();
        let mut skipped = 0_usize;

        let mut clients = self.clients.write();
        let mut pending = Vec::with_capacity(clients.len());
        for (client_id, subscriber) in clients.iter_mut() {
            if subscriber.already_seen(&event) {
                skipped += 1;
                continue;
            }
            if subscriber.filter.matches(category) {
                pending.push(*client_id);
            }
        }

        let message = OutboundMessage::from(event);
        for client_id in &pending {
            if let Some(subscriber) = clients.get(client_id) {
                match subscriber.tx.try_send(message.clone()) {
                    Ok(()) => report.delivered += 1,
                    Err(e) => {
                        warn!(client_id = %client_id, error = %e, "Delivery failed, dropping client");
                        report.dropped.push(*client_id);
                    }
                }
            }
        }
        for client_id in &report.dropped {
            clients.remove(client_id);
        }
        drop(clients);

        debug!(
            category = %category,
            delivered = report.delivered,
            dropped = report.dropped.len(),
            skipped,
            "Broadcast complete"
        );
        report
    }
}
