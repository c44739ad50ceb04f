//! Inspector endpoint: discovery handlers and the WebSocket tunnel.
//!
//! # Routes
//! - `GET /json`, `GET /json/list`: live targets, addressed at this endpoint
//! - `GET /json/version`: protocol version
//! - `GET /<marker>:<worker>` (upgrade): debugger tunnel for one worker
//!
//! Unknown workers are rejected before the upgrade with a 404.

use std::sync::Arc;

use axum::{
    extract::{ws::WebSocketUpgrade, Path, State},
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use tower_http::trace::TraceLayer;

use crate::config::ProxyConfig;
use crate::error::ProxyError;
use crate::inspector::bridge::{BridgeSettings, InspectorBridge};
use crate::inspector::discovery::{parse_tunnel_segment, targets, InspectorTarget, VersionInfo};
use crate::lifecycle::Shutdown;
use crate::observability::metrics;
use crate::registry::DestinationRegistry;
use crate::resilience::Backoff;

/// State shared by the inspector handlers.
#[derive(Clone)]
pub struct InspectorState {
    registry: Arc<DestinationRegistry>,
    marker: Arc<str>,
    settings: BridgeSettings,
    shutdown: Shutdown,
    fallback_host: Arc<str>,
}

impl InspectorState {
    /// `fallback_host` is advertised when a discovery request has no Host header.
    pub fn new(
        registry: Arc<DestinationRegistry>,
        config: &ProxyConfig,
        shutdown: Shutdown,
        fallback_host: impl Into<Arc<str>>,
    ) -> Self {
        Self {
            registry,
            marker: Arc::from(config.inspector.proxy_marker.as_str()),
            settings: BridgeSettings {
                dial: Backoff::from(&config.inspector),
                connect_timeout: config.timeouts.connect(),
                max_buffered_messages: config.inspector.max_buffered_messages,
            },
            shutdown,
            fallback_host: fallback_host.into(),
        }
    }

    fn advertised_host(&self, headers: &HeaderMap) -> String {
        headers
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .unwrap_or(&*self.fallback_host)
            .to_string()
    }
}

/// Router for the inspector endpoint.
pub fn router(state: InspectorState) -> Router {
    Router::new()
        .route("/json", get(list_targets))
        .route("/json/list", get(list_targets))
        .route("/json/version", get(version))
        .route("/{target}", get(tunnel))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn list_targets(
    State(state): State<InspectorState>,
    headers: HeaderMap,
) -> Json<Vec<InspectorTarget>> {
    let host = state.advertised_host(&headers);
    Json(targets(&host, &state.marker, &state.registry.live_workers()))
}

async fn version() -> Json<VersionInfo> {
    Json(VersionInfo::default())
}

async fn tunnel(
    State(state): State<InspectorState>,
    Path(target): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(worker) = parse_tunnel_segment(&state.marker, &target) else {
        return ProxyError::UnknownWorker(target).into_response();
    };
    let Some(slot) = state.registry.get(worker.as_str()) else {
        tracing::debug!(worker = %worker, "Tunnel requested for unknown worker");
        return ProxyError::UnknownWorker(worker.to_string()).into_response();
    };

    let settings = state.settings;
    // Subscribe before the upgrade so a teardown in between is not missed.
    let shutdown = state.shutdown.subscribe();

    ws.on_upgrade(move |socket| async move {
        metrics::inspector_session_opened();
        tracing::info!(worker = %worker, "Inspector client connected");

        let exit = InspectorBridge::new(worker.clone(), socket, slot.subscribe(), settings, shutdown)
            .run()
            .await;

        metrics::inspector_session_closed();
        tracing::info!(worker = %worker, exit = ?exit, "Inspector client disconnected");
    })
}
