//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate addresses, header names, and value ranges
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>

use std::net::SocketAddr;

use axum::http::HeaderName;
use thiserror::Error;

use crate::config::schema::ProxyConfig;

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

/// Check a parsed configuration, collecting every error.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_address(&mut errors, "listener.bind_address", &config.listener.bind_address);
    if HeaderName::from_bytes(config.listener.worker_header.as_bytes()).is_err() {
        errors.push(ValidationError::new(
            "listener.worker_header",
            format!("`{}` is not a valid header name", config.listener.worker_header),
        ));
    }
    if let Some(default_worker) = &config.listener.default_worker {
        if default_worker.is_empty() {
            errors.push(ValidationError::new("listener.default_worker", "must not be empty"));
        }
    }

    let inspector = &config.inspector;
    if inspector.enabled {
        check_address(&mut errors, "inspector.bind_address", &inspector.bind_address);
    }
    if inspector.proxy_marker.is_empty() || inspector.proxy_marker.contains('/') {
        errors.push(ValidationError::new(
            "inspector.proxy_marker",
            "must be non-empty and must not contain `/`",
        ));
    }
    if inspector.connect_attempts == 0 {
        errors.push(ValidationError::new("inspector.connect_attempts", "must be at least 1"));
    }
    if inspector.connect_base_delay_ms > inspector.connect_max_delay_ms {
        errors.push(ValidationError::new(
            "inspector.connect_base_delay_ms",
            "must not exceed connect_max_delay_ms",
        ));
    }
    if inspector.max_buffered_messages == 0 {
        errors.push(ValidationError::new("inspector.max_buffered_messages", "must be at least 1"));
    }

    if config.timeouts.buffer_secs == 0 {
        errors.push(ValidationError::new("timeouts.buffer_secs", "must be greater than 0"));
    }
    if config.timeouts.connect_secs == 0 {
        errors.push(ValidationError::new("timeouts.connect_secs", "must be greater than 0"));
    }

    if config.observability.metrics_enabled {
        check_address(
            &mut errors,
            "observability.metrics_address",
            &config.observability.metrics_address,
        );
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_address(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            field,
            format!("`{}` is not a socket address", value),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&ProxyConfig::default()).is_ok());
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = ProxyConfig::default();
        config.listener.bind_address = "localhost".into();
        config.listener.worker_header = "bad header".into();
        config.inspector.proxy_marker = "a/b".into();
        config.timeouts.buffer_secs = 0;

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert_eq!(
            fields,
            vec![
                "listener.bind_address",
                "listener.worker_header",
                "inspector.proxy_marker",
                "timeouts.buffer_secs",
            ]
        );
    }

    #[test]
    fn test_disabled_inspector_skips_address_check() {
        let mut config = ProxyConfig::default();
        config.inspector.enabled = false;
        config.inspector.bind_address = "nope".into();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_backoff_bounds() {
        let mut config = ProxyConfig::default();
        config.inspector.connect_base_delay_ms = 5000;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "inspector.connect_base_delay_ms");
    }
}
