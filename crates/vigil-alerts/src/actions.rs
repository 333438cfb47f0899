//! Client-initiated commands against active alerts.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::broadcast::ClientId;
use crate::events::{EngineEvent, EventPublisher};
use crate::store::AlertStore;
use crate::types::{Alert, AlertAction, AlertCategory};

/// Action that resolves the alert.
pub const DISMISS: &str = "dismiss";

/// Action that marks the alert read, which also resolves it.
pub const MARK_READ: &str = "mark_read";

/// Returns true for actions the engine carries out itself.
#[must_use]
pub fn is_intrinsic(action: &str) -> bool {
    matches!(action, DISMISS | MARK_READ)
}

/// The actions attached to every new alert of a category.
#[must_use]
pub fn default_actions(category: AlertCategory) -> Vec<AlertAction> {
    match category {
        AlertCategory::Critical => vec![
            AlertAction::primary("Investigate", "investigate"),
            AlertAction::new("Dismiss", DISMISS),
        ],
        AlertCategory::Warning => vec![
            AlertAction::primary("Acknowledge", MARK_READ),
            AlertAction::new("Dismiss", DISMISS),
        ],
        AlertCategory::Info => vec![AlertAction::primary("Mark as read", MARK_READ)],
        AlertCategory::Success => vec![AlertAction::primary("Dismiss", DISMISS)],
        AlertCategory::Performance => vec![
            AlertAction::primary("View metrics", "view_metrics"),
            AlertAction::new("Dismiss", DISMISS),
        ],
        AlertCategory::Security => vec![
            AlertAction::primary("Block IP", "block_ip"),
            AlertAction::new("Investigate", "investigate"),
            AlertAction::new("Dismiss", DISMISS),
        ],
        AlertCategory::Business => vec![
            AlertAction::primary("View report", "view_report"),
            AlertAction::new("Mark as read", MARK_READ),
        ],
        AlertCategory::System => vec![
            AlertAction::primary("Restart service", "restart_service"),
            AlertAction::new("Dismiss", DISMISS),
        ],
    }
}

/// A named action a client asked for that the engine does not perform.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionRequest {
    /// Action name.
    pub action: String,
    /// The alert as it was when the action was requested.
    pub alert: Alert,
    /// The requesting client, if any.
    pub client_id: Option<ClientId>,
}

/// Result of handling a client command.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutcome {
    /// The alert is not active. Nothing happened.
    NotFound,
    /// The alert was resolved and subscribers notified.
    Resolved(Alert),
    /// The action was published to collaborators.
    Requested(ActionRequest),
}

impl ActionOutcome {
    /// Returns true unless the alert was not found.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        !matches!(self, Self::NotFound)
    }
}

/// Validates commands against the store and carries them out.
#[derive(Debug, Clone)]
pub struct ActionDispatcher {
    store: Arc<AlertStore>,
    events: EventPublisher,
    requests: broadcast::Sender<ActionRequest>,
}

impl ActionDispatcher {
    /// Creates a dispatcher. Action requests go out on a channel with room
    /// for `request_capacity` unread requests per listener.
    #[must_use]
    pub fn new(store: Arc<AlertStore>, events: EventPublisher, request_capacity: usize) -> Self {
        let (requests, _) = broadcast::channel(request_capacity.max(1));
        Self {
            store,
            events,
            requests,
        }
    }

    /// Listens for non-intrinsic action requests.
    #[must_use]
    pub fn subscribe_requests(&self) -> broadcast::Receiver<ActionRequest> {
        self.requests.subscribe()
    }

    /// Resolves an alert and notifies subscribers.
    ///
    /// Returns the removed alert, or `None` if it was not active.
    pub fn resolve(&self, alert_id: &str) -> Option<Alert> {
        let alert = self.store.take(alert_id)?;
        info!(alert_id = %alert_id, category = %alert.category, "Alert resolved");
        self.events.publish(EngineEvent::resolved(&alert));
        Some(alert)
    }

    /// Handles `action` on `alert_id` requested by `client_id`.
    pub fn handle(&self, client_id: Option<ClientId>, alert_id: &str, action: &str) -> ActionOutcome {
        if is_intrinsic(action) {
            return self
                .resolve(alert_id)
                .map_or(ActionOutcome::NotFound, ActionOutcome::Resolved);
        }

        let Some(alert) = self.store.get(alert_id) else {
            debug!(alert_id = %alert_id, action = %action, "Action on unknown alert");
            return ActionOutcome::NotFound;
        };

        let request = ActionRequest {
            action: action.to_string(),
            alert,
            client_id,
        };
        match self.requests.send(request.clone()) {
            Ok(listeners) => {
                info!(alert_id = %alert_id, action = %action, listeners, "Action requested");
            }
            Err(_) => {
                debug!(alert_id = %alert_id, action = %action, "Action requested with no listeners");
            }
        }
        ActionOutcome::Requested(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AlertSeverity;
    use tokio::sync::mpsc;

    fn setup() -> (ActionDispatcher, Arc<AlertStore>, mpsc::Receiver<EngineEvent>) {
        let store = Arc::new(AlertStore::new());
        let (events, rx) = EventPublisher::channel(16);
        (ActionDispatcher::new(store.clone(), events, 16), store, rx)
    }

    fn active(store: &AlertStore, category: AlertCategory) -> Alert {
        let alert = Alert::new(category, AlertSeverity::High, "t", "m", "r");
        store.insert(alert.clone()).unwrap();
        alert
    }

    mod table_tests {
        use super::*;

        #[test]
        fn every_category_has_one_primary_action() {
            for category in AlertCategory::ALL {
                let actions = default_actions(category);
                assert!(!actions.is_empty(), "{category} has no actions");
                assert_eq!(actions.iter().filter(|a| a.primary).count(), 1);
            }
        }

        #[test]
        fn intrinsic_actions() {
            assert!(is_intrinsic("dismiss"));
            assert!(is_intrinsic("mark_read"));
            assert!(!is_intrinsic("block_ip"));
        }
    }

    mod dispatch_tests {
        use super::*;

        #[test]
        fn unknown_alert_is_not_found() {
            let (dispatcher, _store, mut rx) = setup();
            assert_eq!(dispatcher.handle(None, "nope", "dismiss"), ActionOutcome::NotFound);
            assert_eq!(dispatcher.handle(None, "nope", "block_ip"), ActionOutcome::NotFound);
            assert!(rx.try_recv().is_err());
        }

        #[test]
        fn dismiss_resolves_and_notifies() {
            let (dispatcher, store, mut rx) = setup();
            let alert = active(&store, AlertCategory::Warning);

            let outcome = dispatcher.handle(None, &alert.id, "dismiss");
            assert_eq!(outcome, ActionOutcome::Resolved(alert.clone()));
            assert!(!store.contains(&alert.id));
            assert_eq!(rx.try_recv().unwrap(), EngineEvent::resolved(&alert));

            // Repeating has no further effect.
            assert_eq!(dispatcher.handle(None, &alert.id, "dismiss"), ActionOutcome::NotFound);
            assert!(rx.try_recv().is_err());
        }

        #[test]
        fn mark_read_resolves() {
            let (dispatcher, store, _rx) = setup();
            let alert = active(&store, AlertCategory::Info);
            assert!(matches!(
                dispatcher.handle(None, &alert.id, "mark_read"),
                ActionOutcome::Resolved(_)
            ));
            assert!(store.is_empty());
        }

        #[test]
        fn custom_action_is_published_not_resolved() {
            let (dispatcher, store, mut rx) = setup();
            let mut requests = dispatcher.subscribe_requests();
            let alert = active(&store, AlertCategory::Security);
            let client = ClientId::new();

            let outcome = dispatcher.handle(Some(client), &alert.id, "block_ip");
            assert!(outcome.is_success());

            let request = requests.try_recv().unwrap();
            assert_eq!(request.action, "block_ip");
            assert_eq!(request.alert.id, alert.id);
            assert_eq!(request.client_id, Some(client));
            assert!(store.contains(&alert.id));
            assert!(rx.try_recv().is_err());
        }

        #[test]
        fn custom_action_without_listeners_still_succeeds() {
            let (dispatcher, store, _rx) = setup();
            let alert = active(&store, AlertCategory::System);
            assert!(matches!(
                dispatcher.handle(None, &alert.id, "restart_service"),
                ActionOutcome::Requested(_)
            ));
        }

        #[test]
        fn resolve_twice() {
            let (dispatcher, store, _rx) = setup();
            let alert = active(&store, AlertCategory::Business);
            assert!(dispatcher.resolve(&alert.id).is_some());
            assert!(dispatcher.resolve(&alert.id).is_none());
        }
    }
}
