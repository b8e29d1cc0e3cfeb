//! Configuration validation.
//!
//! Serde handles the syntactic checks; this module covers semantic ones.
//! All problems are collected rather than stopping at the first.

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::{BridgeConfig, MIN_WEBSOCKET_PING_MS};

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// An address field does not parse as `ip:port`.
    #[error("{field}: invalid socket address '{value}'")]
    InvalidAddress { field: &'static str, value: String },

    /// Ping interval is enabled but shorter than the minimum.
    #[error("bridge.websocket_ping_ms must be 0 or at least {min} (got {value})")]
    PingTooShort { value: u64, min: u64 },
}

/// Validate a parsed configuration.
pub fn validate_config(config: &BridgeConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_address(&mut errors, "listener.bind_address", &config.listener.bind_address);
    check_address(&mut errors, "upstream.address", &config.upstream.address);
    if config.observability.metrics_enabled {
        check_address(
            &mut errors,
            "observability.metrics_address",
            &config.observability.metrics_address,
        );
    }

    let ping = config.bridge.websocket_ping_ms;
    if ping != 0 && ping < MIN_WEBSOCKET_PING_MS {
        errors.push(ValidationError::PingTooShort {
            value: ping,
            min: MIN_WEBSOCKET_PING_MS,
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_address(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field,
            value: value.to_string(),
        });
    }
}
