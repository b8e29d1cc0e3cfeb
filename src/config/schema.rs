//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the bridge.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Smallest WebSocket keep-alive interval that enables pinging.
pub const MIN_WEBSOCKET_PING_MS: u64 = 1_000;

/// Root configuration for the gRPC-Web bridge.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    /// Listener configuration.
    pub listener: ListenerConfig,

    /// Downstream gRPC server that bridged and plain requests are sent to.
    pub upstream: UpstreamConfig,

    /// gRPC-Web bridging behaviour.
    pub bridge: BridgeSettings,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Upstream gRPC server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct UpstreamConfig {
    /// Upstream address (e.g., "127.0.0.1:50051"). Spoken to over h2c.
    pub address: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:50051".to_string(),
        }
    }
}

/// Settings for the gRPC-Web and grpc-websockets bridges.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeSettings {
    /// WebSocket keep-alive ping interval in milliseconds.
    /// 0 disables pinging; otherwise must be at least one second.
    pub websocket_ping_ms: u64,
}

impl BridgeSettings {
    /// The effective ping interval, if pinging is enabled.
    pub fn websocket_ping(&self) -> Option<Duration> {
        if self.websocket_ping_ms >= MIN_WEBSOCKET_PING_MS {
            Some(Duration::from_millis(self.websocket_ping_ms))
        } else {
            None
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimeoutConfig {
    /// Upstream connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Time allowed until response headers are produced, in seconds.
    /// 0 disables the timeout. Streaming bodies are not bounded by it.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            request_secs: 30,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable output for development.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` wins if set.
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_uses_defaults() {
        let config: BridgeConfig = toml::from_str("").unwrap();
        assert_eq!(config.listener.bind_address, "0.0.0.0:8080");
        assert_eq!(config.upstream.address, "127.0.0.1:50051");
        assert_eq!(config.bridge.websocket_ping_ms, 0);
        assert_eq!(config.observability.log_format, LogFormat::Pretty);
    }

    #[test]
    fn parses_full_config() {
        let raw = r#"
            [listener]
            bind_address = "127.0.0.1:9000"

            [upstream]
            address = "10.0.0.5:50051"

            [bridge]
            websocket_ping_ms = 15000

            [observability]
            log_format = "json"
        "#;
        let config: BridgeConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.listener.bind_address, "127.0.0.1:9000");
        assert_eq!(config.upstream.address, "10.0.0.5:50051");
        assert_eq!(config.bridge.websocket_ping(), Some(Duration::from_secs(15)));
        assert_eq!(config.observability.log_format, LogFormat::Json);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let raw = r#"
            [bridge]
            websocket_pong = 10
        "#;
        assert!(toml::from_str::<BridgeConfig>(raw).is_err());
    }

    #[test]
    fn sub_second_ping_is_disabled() {
        let settings = BridgeSettings { websocket_ping_ms: 999 };
        assert_eq!(settings.websocket_ping(), None);

        let settings = BridgeSettings { websocket_ping_ms: 1_000 };
        assert_eq!(settings.websocket_ping(), Some(Duration::from_secs(1)));
    }
}
