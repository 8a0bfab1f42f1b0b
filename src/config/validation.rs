//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, limits > 0, addresses parse)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServerConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;
use thiserror::Error;

use crate::config::schema::ServerConfig;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Check a configuration for values serde cannot rule out.
pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("{:?} is not a socket address", config.listener.bind_address),
        ));
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::new("listener.max_connections", "must be greater than 0"));
    }

    let ws = &config.websocket;
    if !ws.path.starts_with('/') {
        errors.push(ValidationError::new("websocket.path", "must start with '/'"));
    }
    if ws.allowed_origin.is_empty() {
        errors.push(ValidationError::new(
            "websocket.allowed_origin",
            "must be \"*\" or an origin",
        ));
    }
    if ws.max_frame_size == 0 {
        errors.push(ValidationError::new("websocket.max_frame_size", "must be greater than 0"));
    }
    if ws.max_message_size == 0 {
        errors.push(ValidationError::new("websocket.max_message_size", "must be greater than 0"));
    }
    if ws.max_handshake_bytes < 64 {
        errors.push(ValidationError::new(
            "websocket.max_handshake_bytes",
            "must be at least 64",
        ));
    }
    for (field, items) in [
        ("websocket.allowed_protocols", &ws.allowed_protocols),
        ("websocket.allowed_extensions", &ws.allowed_extensions),
    ] {
        if items.iter().any(|item| item.trim().is_empty() || item.contains(',')) {
            errors.push(ValidationError::new(field, "entries must be non-empty and contain no ','"));
        }
    }

    let t = &config.timeouts;
    for (field, value) in [
        ("timeouts.handshake_ms", t.handshake_ms),
        ("timeouts.close_ms", t.close_ms),
        ("timeouts.drain_ms", t.drain_ms),
        ("timeouts.write_ms", t.write_ms),
    ] {
        if value == 0 {
            errors.push(ValidationError::new(field, "must be greater than 0"));
        }
    }

    let r = &config.accept_retry;
    if r.base_delay_ms == 0 {
        errors.push(ValidationError::new("accept_retry.base_delay_ms", "must be greater than 0"));
    }
    if r.max_delay_ms < r.base_delay_ms {
        errors.push(ValidationError::new(
            "accept_retry.max_delay_ms",
            "must not be smaller than base_delay_ms",
        ));
    }

    let o = &config.observability;
    if !LOG_LEVELS.contains(&o.log_level.to_ascii_lowercase().as_str()) {
        errors.push(ValidationError::new(
            "observability.log_level",
            format!("unknown level {:?}", o.log_level),
        ));
    }
    if o.metrics_enabled && o.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("{:?} is not a socket address", o.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
