//! Configuration schema definitions.
//!
//! This module defines the configuration of the proxy itself (not of user
//! workers). All types derive Serde traits and every field has a default, so
//! an empty file is a valid configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for the proxy controller.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Forwarding entry point for application traffic.
    pub listener: ListenerConfig,

    /// Inspector discovery and tunnel endpoint.
    pub inspector: InspectorConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener for externally originated application traffic.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "127.0.0.1:8787"). Port 0 picks a free port.
    pub bind_address: String,

    /// Request header naming the worker a request is meant for.
    pub worker_header: String,

    /// Worker used when the header is absent and more than one worker exists.
    pub default_worker: Option<String>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8787".to_string(),
            worker_header: "x-worker-name".to_string(),
            default_worker: None,
        }
    }
}

/// Inspector proxy configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct InspectorConfig {
    /// Serve discovery and tunnels at all.
    pub enabled: bool,

    /// Bind address of the discovery/tunnel endpoint.
    pub bind_address: String,

    /// First part of the tunnel path: `/<proxy_marker>:<worker>`.
    pub proxy_marker: String,

    /// Attempts to dial a backend inspector before giving up.
    pub connect_attempts: u32,

    /// Base delay for exponential backoff between dial attempts.
    pub connect_base_delay_ms: u64,

    /// Maximum delay between dial attempts.
    pub connect_max_delay_ms: u64,

    /// Client messages kept while no backend is bound.
    pub max_buffered_messages: usize,
}

impl Default for InspectorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "127.0.0.1:9229".to_string(),
            proxy_marker: "core:user".to_string(),
            connect_attempts: 5,
            connect_base_delay_ms: 100,
            connect_max_delay_ms: 2000,
            max_buffered_messages: 1024,
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// How long a request may wait for a live destination, in seconds.
    pub buffer_secs: u64,

    /// Connection establishment timeout towards destinations, in seconds.
    pub connect_secs: u64,
}

impl TimeoutConfig {
    pub fn buffer(&self) -> Duration {
        Duration::from_secs(self.buffer_secs)
    }

    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            buffer_secs: 30,
            connect_secs: 5,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
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
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config: ProxyConfig = toml::from_str("").unwrap();
        assert_eq!(config.listener.bind_address, "127.0.0.1:8787");
        assert_eq!(config.inspector.proxy_marker, "core:user");
        assert_eq!(config.timeouts.buffer(), Duration::from_secs(30));
        assert!(!config.observability.metrics_enabled);
    }

    #[test]
    fn test_partial_sections() {
        let config: ProxyConfig = toml::from_str(
            r#"
            [listener]
            default_worker = "My-Worker"

            [inspector]
            bind_address = "127.0.0.1:9230"
            "#,
        )
        .unwrap();
        assert_eq!(config.listener.default_worker.as_deref(), Some("My-Worker"));
        assert_eq!(config.listener.worker_header, "x-worker-name");
        assert_eq!(config.inspector.bind_address, "127.0.0.1:9230");
        assert_eq!(config.inspector.connect_attempts, 5);
    }
}
