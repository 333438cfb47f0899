//! Client message handlers.
//!
//! Successful requests produce no direct reply: their effects reach clients
//! through the broadcast stream. Failures are answered on the requesting
//! connection only.

use vigil_alerts::{
    ActionOutcome, AlertCategory, AlertEngine, ClientId, ClientMessage, ErrorReply, MetricPayload,
    OutboundMessage, SubscriptionFilter,
};
use tracing::{debug, info, warn};

use crate::ingest::MetricIngest;

/// Handle a subscription change.
pub fn handle_subscribe(
    engine: &AlertEngine,
    client_id: ClientId,
    alert_types: &[String],
) -> Option<OutboundMessage> {
    match SubscriptionFilter::from_names(alert_types) {
        Ok(filter) => {
            if !engine.subscribe_client(client_id, filter) {
                debug!(client_id = %client_id, "Subscribe from client no longer registered");
            }
            None
        }
        Err(e) => {
            warn!(client_id = %client_id, error = %e, "Rejected subscription");
            Some(ErrorReply::invalid_format().into())
        }
    }
}

/// Handle a resolve request.
pub fn handle_resolve(
    engine: &AlertEngine,
    client_id: ClientId,
    alert_id: &str,
) -> Option<OutboundMessage> {
    if engine.resolve_alert(alert_id).success {
        info!(client_id = %client_id, alert_id = %alert_id, "Alert resolved by client");
        None
    } else {
        debug!(client_id = %client_id, alert_id = %alert_id, "Resolve for unknown alert");
        Some(ErrorReply::not_found(alert_id).into())
    }
}

/// Handle an action request.
pub fn handle_action(
    engine: &AlertEngine,
    client_id: ClientId,
    alert_id: &str,
    action: &str,
) -> Option<OutboundMessage> {
    match engine.handle_action(Some(client_id), alert_id, action) {
        ActionOutcome::NotFound => Some(ErrorReply::not_found(alert_id).into()),
        ActionOutcome::Resolved(_) | ActionOutcome::Requested(_) => None,
    }
}

/// Handle a metric report.
pub fn handle_report(
    ingest: Option<&MetricIngest>,
    client_id: ClientId,
    category: AlertCategory,
    metrics: MetricPayload,
) -> Option<OutboundMessage> {
    let Some(ingest) = ingest else {
        debug!(client_id = %client_id, %category, "Metric report while ingestion is off");
        return Some(ErrorReply::metrics_rejected().into());
    };
    match ingest.submit(category, metrics) {
        Ok(()) => None,
        Err(e) => {
            warn!(client_id = %client_id, error = %e, "Metric report rejected");
            Some(ErrorReply::metrics_rejected().into())
        }
    }
}

/// Route a client message to its handler.
pub fn route_message(
    engine: &AlertEngine,
    ingest: Option<&MetricIngest>,
    client_id: ClientId,
    msg: ClientMessage,
) -> Option<OutboundMessage> {
    match msg {
        ClientMessage::Subscribe { alert_types } => {
            handle_subscribe(engine, client_id, &alert_types)
        }
        ClientMessage::ResolveAlert { alert_id } => handle_resolve(engine, client_id, &alert_id),
        ClientMessage::ExecuteAction { alert_id, action } => {
            handle_action(engine, client_id, &alert_id, &action)
        }
        ClientMessage::ReportMetrics {
            alert_type,
            metrics,
        } => handle_report(ingest, client_id, alert_type, metrics),
    }
}
