//! Per-client WebSocket session.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, error, info, warn};
use vigil_alerts::{AlertEngine, ClientMessage, ErrorReply, OutboundMessage};

use crate::config::{ServerConfig, WebSocketConfig};
use crate::error::{ServerError, ServerResult};
use crate::handlers::route_message;
use crate::ingest::MetricIngest;

/// Error text sent for oversized messages.
pub const MESSAGE_TOO_LARGE: &str = "Message too large";

/// Capacity of the per-session reply channel.
const RESPONSE_CHANNEL_CAPACITY: usize = 32;

/// Tracks message size violations for a connection.
#[derive(Debug, Default)]
pub struct ViolationTracker {
    count: u32,
}

impl ViolationTracker {
    /// Create a new violation tracker.
    #[must_use]
    pub const fn new() -> Self {
        Self { count: 0 }
    }

    /// Record a violation and return the current count.
    pub fn record_violation(&mut self) -> u32 {
        self.count = self.count.saturating_add(1);
        self.count
    }

    /// Get the current violation count.
    #[must_use]
    pub const fn count(&self) -> u32 {
        self.count
    }

    /// Returns true once the count exceeds `max_violations`.
    #[must_use]
    pub const fn should_terminate(&self, max_violations: u32) -> bool {
        self.count > max_violations
    }
}

/// Get the size of a WebSocket message in bytes.
#[must_use]
pub fn ws_message_size(ws_msg: &WsMessage) -> usize {
    match ws_msg {
        WsMessage::Text(text) => text.len(),
        WsMessage::Binary(data) | WsMessage::Ping(data) | WsMessage::Pong(data) => data.len(),
        WsMessage::Close(frame) => frame.as_ref().map_or(0, |f| f.reason.len() + 2),
        WsMessage::Frame(frame) => frame.len(),
    }
}

/// Check if a WebSocket message size is within the allowed limits.
///
/// # Errors
///
/// Returns `ServerError::MessageTooLarge` if the message exceeds the configured limit.
pub fn validate_message_size(ws_msg: &WsMessage, config: &WebSocketConfig) -> ServerResult<()> {
    let size = ws_message_size(ws_msg);
    if config.is_message_size_valid(size) {
        Ok(())
    } else {
        Err(ServerError::MessageTooLarge {
            size,
            limit: config.max_message_size,
        })
    }
}

/// Decode a raw WebSocket message into a client request.
///
/// Control frames yield `Ok(None)`.
///
/// # Errors
///
/// Returns `ServerError::ConnectionClosed` for a close frame and
/// `ServerError::Serialization` for anything that is not a valid request.
pub fn process_ws_message(ws_msg: &WsMessage) -> ServerResult<Option<ClientMessage>> {
    match ws_msg {
        WsMessage::Text(text) => Ok(Some(serde_json::from_str(text)?)),
        WsMessage::Binary(data) => Ok(Some(serde_json::from_slice(data)?)),
        WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => Ok(None),
        WsMessage::Close(_) => {
            debug!("Received close frame");
            Err(ServerError::ConnectionClosed)
        }
    }
}

/// Decode a raw WebSocket message after checking its size.
///
/// # Errors
///
/// Returns `ServerError::MessageTooLarge` if the message exceeds the
/// configured limit, otherwise as [`process_ws_message`].
pub fn process_ws_message_with_limits(
    ws_msg: &WsMessage,
    config: &WebSocketConfig,
) -> ServerResult<Option<ClientMessage>> {
    validate_message_size(ws_msg, config)?;
    process_ws_message(ws_msg)
}

/// Serialize an outbound message to a text frame.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn outbound_to_ws(msg: &OutboundMessage) -> ServerResult<WsMessage> {
    Ok(WsMessage::Text(msg.to_json()?))
}

fn too_large_reply(size: usize, limit: usize) -> OutboundMessage {
    debug!(size, limit, "Replying to oversized message");
    ErrorReply {
        error: MESSAGE_TOO_LARGE.to_string(),
        alert_id: None,
    }
    .into()
}

/// Run a client session until either side closes.
///
/// The client is registered with the engine first, which queues the
/// active-alert snapshot ahead of any live event. Two loops then run
/// concurrently: one reads and handles client requests, the other writes
/// replies and broadcast events. If the engine drops the client (its queue
/// overflowed) the outbound channel closes and the session ends. Metric
/// reports are queued on `ingest`, or refused when it is `None`.
///
/// # Errors
///
/// Returns an error if the client could not be registered.
pub async fn run_session<S>(
    ws_stream: S,
    engine: Arc<AlertEngine>,
    ingest: Option<MetricIngest>,
    config: Arc<ServerConfig>,
) -> ServerResult<()>
where
    S: StreamExt<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
        + SinkExt<WsMessage>
        + Unpin
        + Send,
    <S as futures::Sink<WsMessage>>::Error: std::fmt::Display,
{
    let (outbound_tx, mut outbound_rx) = mpsc::channel(config.client_queue_capacity.max(1));
    let client_id = engine
        .connect_client(outbound_tx)
        .ok_or_else(|| ServerError::Internal("failed to queue snapshot".to_string()))?;

    let (mut ws_sink, mut ws_stream) = ws_stream.split();
    info!(client_id = %client_id, "Starting session handler");

    let (response_tx, mut response_rx) =
        mpsc::channel::<OutboundMessage>(RESPONSE_CHANNEL_CAPACITY);

    let read_engine = Arc::clone(&engine);
    let ws_config = config.websocket;

    let read_task = async move {
        let mut violations = ViolationTracker::new();

        while let Some(msg_result) = ws_stream.next().await {
            let ws_msg = match msg_result {
                Ok(msg) => msg,
                Err(e) => {
                    warn!(client_id = %client_id, error = %e, "WebSocket read error");
                    break;
                }
            };

            let reply = match process_ws_message_with_limits(&ws_msg, &ws_config) {
                Ok(Some(msg)) => route_message(&read_engine, ingest.as_ref(), client_id, msg),
                Ok(None) => continue,
                Err(ServerError::ConnectionClosed) => break,
                Err(ServerError::MessageTooLarge { size, limit }) => {
                    let violation_count = violations.record_violation();
                    warn!(
                        client_id = %client_id,
                        size = size,
                        limit = limit,
                        violations = violation_count,
                        "Received oversized message"
                    );

                    if violations.should_terminate(ws_config.max_violations) {
                        error!(
                            client_id = %client_id,
                            violations = violation_count,
                            "Terminating connection due to repeated size violations"
                        );
                        break;
                    }
                    Some(too_large_reply(size, limit))
                }
                Err(e) => {
                    debug!(client_id = %client_id, error = %e, "Malformed client message");
                    Some(ErrorReply::invalid_format().into())
                }
            };

            if let Some(reply) = reply {
                if response_tx.send(reply).await.is_err() {
                    warn!(client_id = %client_id, "Failed to send response to channel");
                    break;
                }
            }
        }

        Ok::<_, ServerError>(())
    };

    let write_task = async {
        loop {
            tokio::select! {
                Some(reply) = response_rx.recv() => {
                    let ws_msg = outbound_to_ws(&reply)?;
                    if let Err(e) = ws_sink.send(ws_msg).await {
                        return Err(ServerError::WebSocket(e.to_string()));
                    }
                }
                msg = outbound_rx.recv() => {
                    let Some(msg) = msg else {
                        info!(client_id = %client_id, "Client dropped by broadcaster, closing");
                        if let Err(e) = ws_sink.send(WsMessage::Close(None)).await {
                            debug!(client_id = %client_id, error = %e, "Failed to send close frame");
                        }
                        break;
                    };
                    let ws_msg = outbound_to_ws(&msg)?;
                    if let Err(e) = ws_sink.send(ws_msg).await {
                        return Err(ServerError::WebSocket(e.to_string()));
                    }
                }
            }
        }
        Ok::<_, ServerError>(())
    };

    tokio::select! {
        read_result = read_task => {
            if let Err(e) = read_result {
                warn!(client_id = %client_id, error = %e, "Read task error");
            }
        }
        write_result = write_task => {
            if let Err(e) = write_result {
                warn!(client_id = %client_id, error = %e, "Write task error");
            }
        }
    }

    engine.disconnect_client(client_id);
    info!(client_id = %client_id, "Session ended");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_tungstenite::tungstenite::protocol::CloseFrame;
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
    use vigil_alerts::{Alert, AlertCategory, AlertSeverity, ServerMessage};

    mod violation_tracker_tests {
        use super::*;

        #[test]
        fn test_new_tracker_is_empty() {
            let tracker = ViolationTracker::new();
            assert_eq!(tracker.count(), 0);
            assert!(!tracker.should_terminate(0));
        }

        #[test]
        fn test_record_and_terminate() {
            let mut tracker = ViolationTracker::default();
            assert_eq!(tracker.record_violation(), 1);
            assert!(!tracker.should_terminate(1));
            assert_eq!(tracker.record_violation(), 2);
            assert!(tracker.should_terminate(1));
        }

        #[test]
        fn test_immediate_termination() {
            let mut tracker = ViolationTracker::new();
            tracker.record_violation();
            assert!(tracker.should_terminate(0));
        }

        #[test]
        fn test_saturating_add() {
            let mut tracker = ViolationTracker { count: u32::MAX };
            assert_eq!(tracker.record_violation(), u32::MAX);
        }
    }

    mod size_tests {
        use super::*;
        use test_case::test_case;

        #[test_case(WsMessage::Text("hello".to_string()), 5 ; "text")]
        #[test_case(WsMessage::Binary(vec![0; 7]), 7 ; "binary")]
        #[test_case(WsMessage::Ping(vec![1, 2]), 2 ; "ping")]
        #[test_case(WsMessage::Close(None), 0 ; "close without frame")]
        fn test_ws_message_size(msg: WsMessage, expected: usize) {
            assert_eq!(ws_message_size(&msg), expected);
        }

        #[test]
        fn test_close_frame_size_counts_code() {
            let msg = WsMessage::Close(Some(CloseFrame {
                code: CloseCode::Normal,
                reason: "bye".into(),
            }));
            assert_eq!(ws_message_size(&msg), 5);
        }

        #[test]
        fn test_validate_at_and_over_limit() {
            let config = WebSocketConfig::new().with_max_message_size(4);
            assert!(validate_message_size(&WsMessage::Text("abcd".to_string()), &config).is_ok());
            assert!(matches!(
                validate_message_size(&WsMessage::Text("abcde".to_string()), &config),
                Err(ServerError::MessageTooLarge { size: 5, limit: 4 })
            ));
        }
    }

    mod process_tests {
        use super::*;
        use test_case::test_case;

        #[test]
        fn test_text_request() {
            let msg = WsMessage::Text(r#"{"type":"resolveAlert","alertId":"a1"}"#.to_string());
            assert_eq!(
                process_ws_message(&msg).unwrap(),
                Some(ClientMessage::ResolveAlert {
                    alert_id: "a1".to_string()
                })
            );
        }

        #[test]
        fn test_binary_request() {
            let msg = WsMessage::Binary(br#"{"type":"subscribe","alertTypes":["all"]}"#.to_vec());
            assert!(matches!(
                process_ws_message(&msg).unwrap(),
                Some(ClientMessage::Subscribe { .. })
            ));
        }

        #[test_case("not json" ; "not json")]
        #[test_case(r#"{"type":"launchMissiles"}"# ; "unknown type")]
        #[test_case(r#"{"type":"resolveAlert"}"# ; "missing field")]
        fn test_malformed_request(text: &str) {
            let msg = WsMessage::Text(text.to_string());
            assert!(matches!(
                process_ws_message(&msg),
                Err(ServerError::Serialization(_))
            ));
        }

        #[test]
        fn test_control_frames_are_skipped() {
            assert!(process_ws_message(&WsMessage::Ping(vec![])).unwrap().is_none());
            assert!(process_ws_message(&WsMessage::Pong(vec![])).unwrap().is_none());
        }

        #[test]
        fn test_close_frame() {
            assert!(matches!(
                process_ws_message(&WsMessage::Close(None)),
                Err(ServerError::ConnectionClosed)
            ));
        }

        #[test]
        fn test_limits_checked_before_parsing() {
            let config = WebSocketConfig::new().with_max_message_size(8);
            let msg = WsMessage::Text("definitely not json".to_string());
            assert!(matches!(
                process_ws_message_with_limits(&msg, &config),
                Err(ServerError::MessageTooLarge { .. })
            ));
        }
    }

    mod outbound_tests {
        use super::*;

        #[test]
        fn test_outbound_is_text_frame() {
            let alert = Alert::new(AlertCategory::Info, AlertSeverity::Low, "t", "m", "s");
            let msg = outbound_to_ws(&ServerMessage::Alert(alert).into()).unwrap();
            match msg {
                WsMessage::Text(text) => assert!(text.starts_with(r#"{"type":"alert""#)),
                other => panic!("expected text frame, got {other:?}"),
            }
        }

        #[test]
        fn test_too_large_reply() {
            let reply = too_large_reply(10, 5);
            assert_eq!(
                reply.to_json().unwrap(),
                format!(r#"{{"error":"{MESSAGE_TOO_LARGE}"}}"#)
            );
        }
    }
}
