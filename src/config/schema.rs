//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the server.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the WebSocket server.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Listener configuration (bind address, connection limit).
    pub listener: ListenerConfig,

    /// Upgrade path, allow-lists and frame limits.
    pub websocket: WebSocketConfig,

    /// Handshake, close and drain deadlines.
    pub timeouts: TimeoutConfig,

    /// Backoff applied when accepting connections fails.
    pub accept_retry: RetryConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_connections: 10_000,
        }
    }
}

/// Which built-in message handler the binary installs.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum HandlerKind {
    /// Send every message back to its sender.
    #[default]
    Echo,
    /// Relay every message to all other connections.
    Broadcast,
}

/// WebSocket protocol settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct WebSocketConfig {
    /// Request target accepted for upgrades (exact match).
    pub path: String,

    /// `"*"` or a single exact Origin value.
    pub allowed_origin: String,

    /// Subprotocols the server speaks.
    pub allowed_protocols: Vec<String>,

    /// Extensions the server accepts during negotiation.
    pub allowed_extensions: Vec<String>,

    /// Largest single frame payload in bytes.
    pub max_frame_size: usize,

    /// Largest reassembled message in bytes.
    pub max_message_size: usize,

    /// Largest HTTP request head accepted during the handshake.
    pub max_handshake_bytes: usize,

    /// Treat unmasked client frames as a protocol error.
    pub require_masked_frames: bool,

    /// Message handler used by the binary.
    pub handler: HandlerKind,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            path: "/".to_string(),
            allowed_origin: "*".to_string(),
            allowed_protocols: Vec::new(),
            allowed_extensions: Vec::new(),
            max_frame_size: 16 * 1024 * 1024,
            max_message_size: 64 * 1024 * 1024,
            max_handshake_bytes: 8 * 1024,
            require_masked_frames: true,
            handler: HandlerKind::Echo,
        }
    }
}

/// Timeout configuration in milliseconds.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Time allowed for the client to send the complete upgrade request.
    pub handshake_ms: u64,

    /// Time to wait for the peer's Close echo after we sent Close.
    pub close_ms: u64,

    /// Time to wait for sessions to finish during shutdown.
    pub drain_ms: u64,

    /// Upper bound on one outbound write, including waiting for the
    /// connection's write gate. A peer that stops reading fails its session.
    pub write_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            handshake_ms: 10_000,
            close_ms: 5_000,
            drain_ms: 10_000,
            write_ms: 10_000,
        }
    }
}

/// Retry configuration for the accept loop.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,

    /// Consecutive failures tolerated before giving up (0 = never give up).
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 50,
            max_delay_ms: 5_000,
            max_attempts: 0,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
