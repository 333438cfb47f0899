//! JSON messages exchanged with live clients.
//!
//! Server to client:
//! - `{"type": "activeAlerts", "data": [Alert, ...]}`
//! - `{"type": "alert", "data": Alert}`
//! - `{"type": "alertResolved", "data": {"alertId": "..."}}`
//! - `{"error": "...", "alertId": "..."}` for rejected requests
//!
//! Client to server:
//! - `{"type": "subscribe", "alertTypes": ["security", ...]}`
//! - `{"type": "resolveAlert", "alertId": "..."}`
//! - `{"type": "executeAction", "alertId": "...", "action": "..."}`
//! - `{"type": "reportMetrics", "alertType": "security", "metrics": {...}}`

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::events::EngineEvent;
use crate::payload::MetricPayload;
use crate::types::{Alert, AlertCategory};

/// Error text for anything that does not parse as a [`ClientMessage`].
pub const INVALID_MESSAGE_FORMAT: &str = "Invalid message format";

/// Error text for requests naming an alert that is not active.
pub const ALERT_NOT_FOUND: &str = "Alert not found";

/// Error text for metric reports the server cannot queue.
pub const METRICS_REJECTED: &str = "Metrics rejected";

/// Body of an `alertResolved` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedNotice {
    /// Id of the resolved alert.
    pub alert_id: String,
}

/// Typed server push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum ServerMessage {
    /// Snapshot of every active alert, sent once on connect.
    ActiveAlerts(Vec<Alert>),
    /// A new alert.
    Alert(Alert),
    /// An alert was resolved.
    AlertResolved(ResolvedNotice),
}

impl From<EngineEvent> for ServerMessage {
    fn from(event: EngineEvent) -> Self {
        match event {
            EngineEvent::AlertCreated(alert) => Self::Alert(alert),
            EngineEvent::AlertResolved { alert_id, .. } => {
                Self::AlertResolved(ResolvedNotice { alert_id })
            }
        }
    }
}

/// Error reply sent to one client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorReply {
    /// Error text.
    pub error: String,
    /// Alert the request referred to, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert_id: Option<String>,
}

impl ErrorReply {
    /// Reply for unparseable input.
    #[must_use]
    pub fn invalid_format() -> Self {
        Self {
            error: INVALID_MESSAGE_FORMAT.to_string(),
            alert_id: None,
        }
    }

    /// Reply for a metric report that could not be queued.
    #[must_use]
    pub fn metrics_rejected() -> Self {
        Self {
            error: METRICS_REJECTED.to_string(),
            alert_id: None,
        }
    }

    /// Reply for a request on an unknown alert.
    #[must_use]
    pub fn not_found(alert_id: impl Into<String>) -> Self {
        Self {
            error: ALERT_NOT_FOUND.to_string(),
            alert_id: Some(alert_id.into()),
        }
    }
}

/// Anything written to a client's outbound queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OutboundMessage {
    /// A typed push.
    Event(ServerMessage),
    /// An error reply.
    Error(ErrorReply),
}

impl OutboundMessage {
    /// Serializes to a JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::SerializationError` if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl From<ServerMessage> for OutboundMessage {
    fn from(msg: ServerMessage) -> Self {
        Self::Event(msg)
    }
}

impl From<ErrorReply> for OutboundMessage {
    fn from(reply: ErrorReply) -> Self {
        Self::Error(reply)
    }
}

impl From<EngineEvent> for OutboundMessage {
    fn from(event: EngineEvent) -> Self {
        Self::Event(event.into())
    }
}

/// Requests a client may send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    /// Replace the client's subscription. `"all"` subscribes to everything.
    Subscribe {
        /// Category names.
        #[serde(rename = "alertTypes")]
        alert_types: Vec<String>,
    },
    /// Resolve an alert.
    ResolveAlert {
        /// Target alert.
        #[serde(rename = "alertId")]
        alert_id: String,
    },
    /// Run a named action on an alert.
    ExecuteAction {
        /// Target alert.
        #[serde(rename = "alertId")]
        alert_id: String,
        /// Action name.
        action: String,
    },
    /// Push a metric sample for the next evaluation of a category.
    ReportMetrics {
        /// Category whose rules should see the sample.
        #[serde(rename = "alertType")]
        alert_type: AlertCategory,
        /// The sample.
        metrics: MetricPayload,
    },
}

impl ClientMessage {
    /// Parses a text frame.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::SerializationError` for malformed input.
    pub fn parse(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}
