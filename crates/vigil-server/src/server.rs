//! WebSocket alert server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_tungstenite::accept_async_with_config;
use tracing::{debug, info, warn};
use vigil_alerts::AlertEngine;

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::ingest::MetricIngest;
use crate::session::run_session;

/// Holds one slot of the connection limit until dropped.
#[derive(Debug)]
struct ConnectionSlot {
    active: Arc<AtomicUsize>,
}

impl ConnectionSlot {
    fn acquire(active: &Arc<AtomicUsize>, max: usize) -> Option<Self> {
        let previous = active.fetch_add(1, Ordering::AcqRel);
        if previous >= max {
            active.fetch_sub(1, Ordering::AcqRel);
            return None;
        }
        Some(Self {
            active: Arc::clone(active),
        })
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Accepts WebSocket clients and attaches each to the alert engine.
#[derive(Debug)]
pub struct AlertServer {
    config: Arc<ServerConfig>,
    engine: Arc<AlertEngine>,
    ingest: Option<MetricIngest>,
    active: Arc<AtomicUsize>,
    shutdown_tx: watch::Sender<bool>,
}

impl AlertServer {
    /// Create a server for `engine`.
    #[must_use]
    pub fn new(config: ServerConfig, engine: Arc<AlertEngine>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            config: Arc::new(config),
            engine,
            ingest: None,
            active: Arc::new(AtomicUsize::new(0)),
            shutdown_tx,
        }
    }

    /// Accept `reportMetrics` messages, queueing them on `ingest`.
    #[must_use]
    pub fn with_ingest(mut self, ingest: MetricIngest) -> Self {
        self.ingest = Some(ingest);
        self
    }

    /// Get the server configuration.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Get the engine clients are attached to.
    #[must_use]
    pub fn engine(&self) -> Arc<AlertEngine> {
        Arc::clone(&self.engine)
    }

    /// Number of open connections, including ones still handshaking.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Bind `addr` and serve until [`AlertServer::shutdown`] is called.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::BindFailed` if the address cannot be bound.
    pub async fn serve(&self, addr: SocketAddr) -> ServerResult<()> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::BindFailed(addr, e))?;
        self.serve_with_listener(listener).await
    }

    /// Serve on an already bound listener until [`AlertServer::shutdown`]
    /// is called.
    ///
    /// # Errors
    ///
    /// Currently infallible once the listener is bound.
    pub async fn serve_with_listener(&self, listener: TcpListener) -> ServerResult<()> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        match listener.local_addr() {
            Ok(addr) => info!(addr = %addr, "Alert server listening"),
            Err(e) => debug!(error = %e, "Listener address unavailable"),
        }

        if *shutdown_rx.borrow_and_update() {
            return Ok(());
        }

        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, peer_addr)) => self.handle_connection(stream, peer_addr),
                        Err(e) => warn!(error = %e, "Failed to accept connection"),
                    }
                }
                _ = shutdown_rx.changed() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        info!("Alert server stopped accepting connections");
        Ok(())
    }

    fn handle_connection(&self, stream: TcpStream, peer_addr: SocketAddr) {
        debug!(peer = %peer_addr, "New connection");

        let Some(slot) = ConnectionSlot::acquire(&self.active, self.config.max_connections) else {
            warn!(
                peer = %peer_addr,
                max = self.config.max_connections,
                "Connection rejected: max connections reached"
            );
            return;
        };

        let engine = Arc::clone(&self.engine);
        let ingest = self.ingest.clone();
        let config = Arc::clone(&self.config);

        tokio::spawn(async move {
            let _slot = slot;
            let protocol = config.websocket.protocol_config();
            let ws_stream = match accept_async_with_config(stream, Some(protocol)).await {
                Ok(ws) => ws,
                Err(e) => {
                    warn!(peer = %peer_addr, error = %e, "WebSocket handshake failed");
                    return;
                }
            };
            info!(peer = %peer_addr, "WebSocket connection established");

            match run_session(ws_stream, engine, ingest, config).await {
                Ok(()) => debug!(peer = %peer_addr, "Connection closed normally"),
                Err(e) => debug!(peer = %peer_addr, error = %e, "Connection ended with error"),
            }
        });
    }

    /// Stop accepting connections. Open sessions are unaffected.
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }
}
