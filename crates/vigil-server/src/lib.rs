//! # vigil-server
//!
//! WebSocket front-end for the vigil alert engine.
//!
//! Clients connect over WebSocket, receive the active alerts, and then get
//! live `alert` and `alertResolved` pushes for the categories they subscribe
//! to. They can resolve alerts and run alert actions.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     WebSocket      ┌─────────────────┐
//! │  dashboard   │◄──────────────────►│   AlertServer   │
//! └──────────────┘                    │   ┌─────────┐   │
//!                                     │   │ session │   │
//! ┌──────────────┐                    │   └────┬────┘   │
//! │  dashboard   │◄──────────────────►│        │        │
//! └──────────────┘                    │   ┌────▼────┐   │
//!                                     │   │ Alert-  │◄──┼── SystemProbe
//!                                     │   │ Engine  │◄──┼── PerformanceProbe
//!                                     │   └─────────┘◄──┼── IngestSource
//!                                     │                 │   (reportMetrics)
//!                                     └─────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use vigil_alerts::{AlertEngine, EngineConfig};
//! use vigil_server::{AlertServer, ServerConfig, register_rules, default_rules};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = Arc::new(AlertEngine::new(EngineConfig::default()));
//!     register_rules(&engine, default_rules());
//!     let handle = engine.start(Vec::new())?;
//!
//!     let config = ServerConfig::default();
//!     let server = AlertServer::new(config.clone(), Arc::clone(&engine));
//!     server.serve(config.bind_addr).await?;
//!     handle.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Message Protocol
//!
//! Server to client:
//!
//! - `activeAlerts`: snapshot sent once on connect
//! - `alert`: a new alert in a subscribed category
//! - `alertResolved`: an alert left the active set
//!
//! Client to server:
//!
//! - `subscribe`: replace the category filter (`"all"` for everything)
//! - `resolveAlert`: resolve an alert by id
//! - `executeAction`: run a named action on an alert
//! - `reportMetrics`: queue a metric sample for the next evaluation tick
//!
//! Malformed requests are answered with `{"error": "Invalid message format"}`.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod handlers;
pub mod ingest;
pub mod probes;
pub mod rule_seed;
pub mod server;
pub mod session;

pub use config::{
    DEFAULT_CLIENT_QUEUE_CAPACITY, DEFAULT_INGEST_QUEUE_CAPACITY, DEFAULT_MAX_FRAME_SIZE,
    DEFAULT_MAX_MESSAGE_SIZE, DEFAULT_MAX_VIOLATIONS, ProbeConfig, ServerConfig, VigilConfig,
    WebSocketConfig,
};
pub use error::{ServerError, ServerResult};
pub use handlers::{
    handle_action, handle_report, handle_resolve, handle_subscribe, route_message,
};
pub use ingest::{IngestSource, MetricIngest};
pub use probes::{PerformanceProbe, SystemProbe, configured_sources};
pub use rule_seed::{default_rules, register_rules};
pub use server::AlertServer;
pub use session::{
    MESSAGE_TOO_LARGE, ViolationTracker, outbound_to_ws, process_ws_message,
    process_ws_message_with_limits, run_session, validate_message_size, ws_message_size,
};
