//! Internal event queue between producers (evaluator, dispatcher, sweeper)
//! and the broadcaster.

use tokio::sync::mpsc;
use tracing::warn;

use crate::types::{Alert, AlertCategory};

/// Something subscribers should hear about.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// A new alert became active.
    AlertCreated(Alert),
    /// An alert was resolved explicitly or by expiry.
    AlertResolved {
        /// Id of the resolved alert.
        alert_id: String,
        /// Category of the resolved alert, used for subscription filtering.
        category: AlertCategory,
    },
}

impl EngineEvent {
    /// Builds a resolution event for an alert.
    #[must_use]
    pub fn resolved(alert: &Alert) -> Self {
        Self::AlertResolved {
            alert_id: alert.id.clone(),
            category: alert.category,
        }
    }

    /// Category used to match subscriptions.
    #[must_use]
    pub const fn category(&self) -> AlertCategory {
        match self {
            Self::AlertCreated(alert) => alert.category,
            Self::AlertResolved { category, .. } => *category,
        }
    }

    /// Id of the alert the event concerns.
    #[must_use]
    pub fn alert_id(&self) -> &str {
        match self {
            Self::AlertCreated(alert) => &alert.id,
            Self::AlertResolved { alert_id, .. } => alert_id,
        }
    }
}

/// Sending half of the bounded event queue.
///
/// Publishing never blocks: when the queue is full the event is dropped and
/// logged.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    tx: mpsc::Sender<EngineEvent>,
}

impl EventPublisher {
    /// Creates a publisher and the matching receiver.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<EngineEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Queues an event. Returns false if it was dropped.
    pub fn publish(&self, event: EngineEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!(alert_id = %event.alert_id(), "Event queue full, dropping event");
                false
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                warn!(alert_id = %event.alert_id(), "Event queue closed, dropping event");
                false
            }
        }
    }
}
