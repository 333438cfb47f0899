//! Server configuration.

use std::net::SocketAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;
use vigil_alerts::{EngineConfig, RuleDefinition};

use crate::error::{ServerError, ServerResult};
use crate::rule_seed::default_rules;

/// Default maximum WebSocket message size: 64KB.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Default maximum WebSocket frame size: 64KB.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024;

/// Default maximum violations before connection termination.
pub const DEFAULT_MAX_VIOLATIONS: u32 = 3;

/// Default per-client outbound queue depth.
pub const DEFAULT_CLIENT_QUEUE_CAPACITY: usize = 256;

/// Default number of metric reports buffered per category.
pub const DEFAULT_INGEST_QUEUE_CAPACITY: usize = 256;

/// Configuration for WebSocket message handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebSocketConfig {
    /// Maximum allowed message size in bytes.
    /// Messages larger than this get an error reply and count as a violation.
    pub max_message_size: usize,
    /// Maximum allowed frame size in bytes, enforced by the protocol layer.
    pub max_frame_size: usize,
    /// Maximum number of size violations before terminating the connection.
    /// Set to 0 to close immediately on first violation.
    pub max_violations: u32,
}

impl WebSocketConfig {
    /// Create a new WebSocket configuration with default values.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_violations: DEFAULT_MAX_VIOLATIONS,
        }
    }

    /// Set the maximum message size.
    #[must_use]
    pub const fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Set the maximum frame size.
    #[must_use]
    pub const fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    /// Set the maximum number of violations before termination.
    #[must_use]
    pub const fn with_max_violations(mut self, max: u32) -> Self {
        self.max_violations = max;
        self
    }

    /// Check if a message size is within the allowed limit.
    #[must_use]
    pub const fn is_message_size_valid(&self, size: usize) -> bool {
        size <= self.max_message_size
    }

    /// Protocol-level limits handed to the WebSocket handshake.
    ///
    /// Messages are capped at a multiple of the application limit so that
    /// oversize messages still reach the session and get an error reply
    /// instead of a dropped connection.
    #[must_use]
    pub fn protocol_config(&self) -> tokio_tungstenite::tungstenite::protocol::WebSocketConfig {
        let mut config = tokio_tungstenite::tungstenite::protocol::WebSocketConfig::default();
        config.max_message_size = Some(self.max_message_size.saturating_mul(4));
        config.max_frame_size = Some(self.max_frame_size.max(self.max_message_size).saturating_mul(4));
        config
    }
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for the WebSocket server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind the WebSocket server to.
    pub bind_addr: SocketAddr,
    /// Maximum number of concurrent connections.
    pub max_connections: usize,
    /// Outbound queue depth per client. A client whose queue is full is
    /// disconnected.
    pub client_queue_capacity: usize,
    /// WebSocket configuration for message size limits.
    pub websocket: WebSocketConfig,
}

impl ServerConfig {
    /// Create a new server configuration with the specified bind address.
    #[must_use]
    pub const fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            max_connections: 1000,
            client_queue_capacity: DEFAULT_CLIENT_QUEUE_CAPACITY,
            websocket: WebSocketConfig::new(),
        }
    }

    /// Set the WebSocket configuration.
    #[must_use]
    pub const fn with_websocket_config(mut self, config: WebSocketConfig) -> Self {
        self.websocket = config;
        self
    }

    /// Set the maximum number of connections.
    #[must_use]
    pub const fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the per-client queue capacity.
    #[must_use]
    pub const fn with_client_queue_capacity(mut self, capacity: usize) -> Self {
        self.client_queue_capacity = capacity;
        self
    }

    /// Set the bind address.
    #[must_use]
    pub const fn with_bind_addr(mut self, bind_addr: SocketAddr) -> Self {
        self.bind_addr = bind_addr;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(([0, 0, 0, 0], 8080).into())
    }
}

/// Which metric sources run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Host CPU, memory and load under the `system` category.
    pub system: bool,
    /// Connected clients and active alerts under the `performance` category.
    pub performance: bool,
    /// Accept `reportMetrics` messages from clients for every category.
    pub ingest: bool,
    /// Reports buffered per category between evaluation ticks.
    pub ingest_queue_capacity: usize,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            system: true,
            performance: true,
            ingest: true,
            ingest_queue_capacity: DEFAULT_INGEST_QUEUE_CAPACITY,
        }
    }
}

/// Complete configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VigilConfig {
    /// WebSocket server settings.
    pub server: ServerConfig,
    /// Engine timing and queue settings.
    pub engine: EngineConfig,
    /// Built-in probes.
    pub probes: ProbeConfig,
    /// Rules to register. When absent the built-in rule set is used.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rules: Option<Vec<RuleDefinition>>,
}

impl VigilConfig {
    /// A configuration with every built-in rule written out, suitable as a
    /// starting point for editing.
    #[must_use]
    pub fn sample() -> Self {
        Self {
            rules: Some(default_rules()),
            ..Self::default()
        }
    }

    /// Parses and validates a configuration.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Serialization` for malformed JSON and
    /// `ServerError::Config` for invalid values.
    pub fn from_json(text: &str) -> ServerResult<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a configuration file.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::ConfigIo` if the file cannot be read, otherwise
    /// as [`VigilConfig::from_json`].
    pub fn load(path: &Path) -> ServerResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| ServerError::ConfigIo {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_json(&text)?;
        debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Writes the configuration as pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::ConfigIo` if the file cannot be written.
    pub fn save(&self, path: &Path) -> ServerResult<()> {
        let text = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| ServerError::ConfigIo {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(path, text).map_err(|source| ServerError::ConfigIo {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Checks value ranges and rule definitions.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Config` describing the first problem found.
    pub fn validate(&self) -> ServerResult<()> {
        if self.server.max_connections == 0 {
            return Err(ServerError::Config(
                "server.max_connections must be greater than 0".to_string(),
            ));
        }
        if self.server.client_queue_capacity == 0 {
            return Err(ServerError::Config(
                "server.client_queue_capacity must be greater than 0".to_string(),
            ));
        }
        if self.server.websocket.max_message_size == 0 {
            return Err(ServerError::Config(
                "server.websocket.max_message_size must be greater than 0".to_string(),
            ));
        }
        if self.probes.ingest && self.probes.ingest_queue_capacity == 0 {
            return Err(ServerError::Config(
                "probes.ingest_queue_capacity must be greater than 0".to_string(),
            ));
        }
        self.engine
            .validate()
            .map_err(|reason| ServerError::Config(format!("engine: {reason}")))?;

        if let Some(rules) = &self.rules {
            let mut seen = std::collections::HashSet::new();
            for rule in rules {
                if !seen.insert(rule.id.as_str()) {
                    return Err(ServerError::Config(format!("duplicate rule id '{}'", rule.id)));
                }
                rule.clone()
                    .into_rule()
                    .map_err(|e| ServerError::Config(format!("rule '{}': {e}", rule.id)))?;
            }
        }
        Ok(())
    }

    /// The rules to register: the configured ones, or the built-in set.
    #[must_use]
    pub fn effective_rules(&self) -> Vec<RuleDefinition> {
        self.rules.clone().unwrap_or_else(default_rules)
    }
}
