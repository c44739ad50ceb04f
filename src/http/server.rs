//! HTTP server setup for the forwarding entry point.
//!
//! # Responsibilities
//! - Create the Axum router that hands every request to the request proxy
//! - Wire up middleware (tracing, request ID)
//! - Serve a bound listener until the shutdown coordinator fires

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::Request,
    response::{IntoResponse, Response},
    Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::{
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::http::request::{request_id_header, MakeRequestUuid, WorkerSelector};
use crate::lifecycle::Shutdown;
use crate::proxy::RequestProxy;
use crate::registry::DestinationRegistry;

/// Application state injected into the entry handler.
#[derive(Clone)]
pub struct EntryState {
    pub registry: Arc<DestinationRegistry>,
    pub proxy: RequestProxy,
    pub selector: WorkerSelector,
}

/// Router for application traffic. Every method and path is forwarded.
pub fn entry_router(state: EntryState) -> Router {
    Router::new()
        .fallback(forward_handler)
        .with_state(state)
        .layer(PropagateRequestIdLayer::new(request_id_header()))
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::new(request_id_header(), MakeRequestUuid))
}

async fn forward_handler(State(state): State<EntryState>, mut request: Request<Body>) -> Response {
    let slot = match state.selector.select(request.headers_mut(), &state.registry) {
        Ok(slot) => slot,
        Err(e) => {
            tracing::debug!(error = %e, path = %request.uri().path(), "No worker for request");
            return e.into_response();
        }
    };

    match state.proxy.forward(&slot, request).await {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!(worker = %slot.name(), error = %e, "Forward failed");
            e.into_response()
        }
    }
}

/// Serve `router` on `listener` until shutdown is triggered.
pub fn spawn_server(
    label: &'static str,
    listener: TcpListener,
    router: Router,
    shutdown: &Shutdown,
) -> JoinHandle<()> {
    let signal = shutdown.wait();
    tokio::spawn(async move {
        let address = listener
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_default();
        tracing::info!(endpoint = label, address = %address, "Server starting");

        if let Err(e) = axum::serve(listener, router)
            .with_graceful_shutdown(signal)
            .await
        {
            tracing::error!(endpoint = label, error = %e, "Server failed");
        }
        tracing::info!(endpoint = label, "Server stopped");
    })
}
