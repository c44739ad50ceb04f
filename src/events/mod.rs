//! Lifecycle events delivered by the runtime-management layer.
//!
//! # Data Flow
//! ```text
//! runtime manager
//!     → configUpdate / reloadStart / reloadComplete (JSON or in-process)
//!     → ProxyController::dispatch
//!     → the worker's sequential task (ordered per worker)
//! ```
//!
//! Config and bundle payloads are opaque: the proxy only compares them for
//! identity.

pub mod intake;

use serde::{Deserialize, Serialize};

use crate::registry::{Generation, ProxyData, WorkerName};

/// Configuration of a user worker. Only `name` is interpreted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub name: WorkerName,

    #[serde(flatten)]
    pub options: serde_json::Map<String, serde_json::Value>,
}

impl WorkerConfig {
    pub fn new(name: impl Into<WorkerName>) -> Self {
        Self {
            name: name.into(),
            options: serde_json::Map::new(),
        }
    }

    /// Attach opaque options. Non-object values are ignored.
    pub fn with_options(mut self, options: serde_json::Value) -> Self {
        if let serde_json::Value::Object(map) = options {
            self.options = map;
        }
        self
    }
}

/// Descriptor of the bundle a reload is built from.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BundleDescriptor(serde_json::Value);

impl From<serde_json::Value> for BundleDescriptor {
    fn from(value: serde_json::Value) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigUpdate {
    pub config: WorkerConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReloadStart {
    pub config: WorkerConfig,
    #[serde(default, alias = "bundleDescriptor")]
    pub bundle: BundleDescriptor,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReloadComplete {
    pub config: WorkerConfig,
    #[serde(default, alias = "bundleDescriptor")]
    pub bundle: BundleDescriptor,
    pub proxy_data: ProxyData,
    /// Generation returned by the matching reload start, when the sender tracks it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation: Option<Generation>,
}

/// Any lifecycle event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ProxyEvent {
    ConfigUpdate(ConfigUpdate),
    ReloadStart(ReloadStart),
    ReloadComplete(ReloadComplete),
}

impl ProxyEvent {
    pub fn worker_name(&self) -> &WorkerName {
        match self {
            ProxyEvent::ConfigUpdate(e) => &e.config.name,
            ProxyEvent::ReloadStart(e) => &e.config.name,
            ProxyEvent::ReloadComplete(e) => &e.config.name,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ProxyEvent::ConfigUpdate(_) => "configUpdate",
            ProxyEvent::ReloadStart(_) => "reloadStart",
            ProxyEvent::ReloadComplete(_) => "reloadComplete",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::DestinationUrl;
    use serde_json::json;

    #[test]
    fn test_decodes_reload_complete() {
        let event: ProxyEvent = serde_json::from_value(json!({
            "type": "reloadComplete",
            "config": { "name": "My-Worker", "script": { "contents": "..." } },
            "bundle": { "format": "modules", "modules": [] },
            "proxyData": {
                "destinationURL": { "host": "127.0.0.1:8788" },
                "destinationInspectorURL": "ws://127.0.0.1:9777/core:user:My-Worker",
                "headers": {}
            }
        }))
        .unwrap();

        assert_eq!(event.kind(), "reloadComplete");
        assert_eq!(event.worker_name().as_str(), "My-Worker");
        let ProxyEvent::ReloadComplete(complete) = event else {
            panic!("expected reloadComplete");
        };
        assert!(complete.generation.is_none());
        assert!(complete.config.options.contains_key("script"));
        assert_eq!(
            complete.proxy_data.destination_url,
            DestinationUrl::Parts {
                protocol: None,
                host: "127.0.0.1:8788".into()
            }
        );
    }

    #[test]
    fn test_reload_start_without_bundle() {
        let event: ProxyEvent = serde_json::from_str(
            r#"{"type":"reloadStart","config":{"name":"w"}}"#,
        )
        .unwrap();
        match event {
            ProxyEvent::ReloadStart(start) => {
                assert_eq!(start.bundle, BundleDescriptor::default());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_accepts_bundle_descriptor_key() {
        let event: ProxyEvent = serde_json::from_value(json!({
            "type": "reloadStart",
            "config": { "name": "w" },
            "bundleDescriptor": { "format": "modules", "entry": "index.js" }
        }))
        .unwrap();
        let ProxyEvent::ReloadStart(start) = event else {
            panic!("expected reloadStart");
        };
        assert_ne!(start.bundle, BundleDescriptor::default());
    }

    #[test]
    fn test_unknown_event_type_is_rejected() {
        let result: Result<ProxyEvent, _> =
            serde_json::from_str(r#"{"type":"teardown","config":{"name":"w"}}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_round_trips_explicit_generation() {
        let event = ProxyEvent::ReloadComplete(ReloadComplete {
            config: WorkerConfig::new("w"),
            bundle: BundleDescriptor::default(),
            proxy_data: ProxyData {
                destination_url: DestinationUrl::Full("http://127.0.0.1:1".into()),
                destination_inspector_url: None,
                headers: Default::default(),
            },
            generation: Some(Generation::new(3)),
        });
        let text = serde_json::to_string(&event).unwrap();
        assert!(text.contains(r#""type":"reloadComplete""#));
        assert!(text.contains(r#""generation":3"#));
        assert_eq!(serde_json::from_str::<ProxyEvent>(&text).unwrap(), event);
    }
}
