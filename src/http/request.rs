//! Request handling on the forwarding entry point.
//!
//! # Responsibilities
//! - Generate a unique request ID (UUID v4) for tracing
//! - Decide which worker a request is meant for
//!
//! # Design Decisions
//! - Request ID added as early as possible for tracing
//! - The worker-selection header is consumed here and never forwarded

use axum::http::{HeaderMap, HeaderName, HeaderValue, Request};
use tower_http::request_id::{MakeRequestId, RequestId};
use uuid::Uuid;

use crate::controller::worker::WorkerSlot;
use crate::error::{ProxyError, ProxyResult};
use crate::registry::DestinationRegistry;

pub const X_REQUEST_ID: &str = "x-request-id";

pub fn request_id_header() -> HeaderName {
    HeaderName::from_static(X_REQUEST_ID)
}

/// Request IDs as random UUIDs.
#[derive(Debug, Clone, Copy, Default)]
pub struct MakeRequestUuid;

impl MakeRequestId for MakeRequestUuid {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        HeaderValue::from_str(&Uuid::new_v4().to_string())
            .ok()
            .map(RequestId::new)
    }
}

/// How the entry point maps a request to a worker.
#[derive(Debug, Clone)]
pub struct WorkerSelector {
    pub header: HeaderName,
    pub default_worker: Option<String>,
}

impl WorkerSelector {
    /// Pick the target worker, removing the selection header.
    ///
    /// Order: explicit header, configured default, the only registered worker.
    pub fn select(&self, headers: &mut HeaderMap, registry: &DestinationRegistry) -> ProxyResult<WorkerSlot> {
        let requested = headers
            .remove(&self.header)
            .and_then(|v| v.to_str().ok().map(str::to_owned));

        if let Some(name) = requested.or_else(|| self.default_worker.clone()) {
            return registry.get(&name).ok_or(ProxyError::UnknownWorker(name));
        }

        match registry.names().as_slice() {
            [only] => registry
                .get(only.as_str())
                .ok_or_else(|| ProxyError::UnknownWorker(only.to_string())),
            _ => Err(ProxyError::UnknownWorker("(none)".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::WorkerName;

    fn selector(default_worker: Option<&str>) -> WorkerSelector {
        WorkerSelector {
            header: HeaderName::from_static("x-worker-name"),
            default_worker: default_worker.map(str::to_owned),
        }
    }

    #[tokio::test]
    async fn test_header_wins_and_is_stripped() {
        let registry = DestinationRegistry::new();
        registry.get_or_spawn(&WorkerName::from("a"));
        registry.get_or_spawn(&WorkerName::from("b"));

        let mut headers = HeaderMap::new();
        headers.insert("x-worker-name", HeaderValue::from_static("b"));
        let slot = selector(Some("a")).select(&mut headers, &registry).unwrap();
        assert_eq!(slot.name().as_str(), "b");
        assert!(headers.get("x-worker-name").is_none());
    }

    #[tokio::test]
    async fn test_falls_back_to_default_then_single_worker() {
        let registry = DestinationRegistry::new();
        registry.get_or_spawn(&WorkerName::from("only"));

        let slot = selector(None).select(&mut HeaderMap::new(), &registry).unwrap();
        assert_eq!(slot.name().as_str(), "only");

        let err = selector(Some("missing"))
            .select(&mut HeaderMap::new(), &registry)
            .unwrap_err();
        assert!(matches!(err, ProxyError::UnknownWorker(name) if name == "missing"));
    }

    #[tokio::test]
    async fn test_ambiguous_without_header() {
        let registry = DestinationRegistry::new();
        registry.get_or_spawn(&WorkerName::from("a"));
        registry.get_or_spawn(&WorkerName::from("b"));
        assert!(selector(None).select(&mut HeaderMap::new(), &registry).is_err());
    }

    #[test]
    fn test_request_ids_are_unique() {
        let request = Request::new(());
        let mut make = MakeRequestUuid;
        let a = make.make_request_id(&request).unwrap();
        let b = make.make_request_id(&request).unwrap();
        assert_ne!(a.header_value(), b.header_value());
    }
}
