//! Error taxonomy for the proxy controller.
//!
//! # Design Decisions
//! - Buffering and generation races are resolved internally; `StaleReload`
//!   and `UnknownGeneration` are only ever logged
//! - Failures are scoped to a single worker; nothing here is fatal to the process
//! - Errors map onto HTTP statuses so the forwarding entry point can render them

use std::time::Duration;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::registry::Generation;

/// Errors produced by the proxy controller and its components.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// The caller cancelled or timed out while its request was buffered.
    #[error("worker `{worker}` was not ready after {}ms; request aborted", waited.as_millis())]
    RequestAborted { worker: String, waited: Duration },

    /// The live destination could not be reached at forward time.
    #[error("upstream for worker `{worker}` is unavailable: {reason}")]
    UpstreamUnavailable { worker: String, reason: String },

    /// A reload completion referenced an outdated generation and was discarded.
    #[error("stale reload for worker `{worker}`: generation {received} is behind {current}")]
    StaleReload {
        worker: String,
        received: Generation,
        current: Generation,
    },

    /// A reload completion named a generation no reload has started yet.
    #[error("unknown generation for worker `{worker}`: {received} is ahead of {current}")]
    UnknownGeneration {
        worker: String,
        received: Generation,
        current: Generation,
    },

    /// The backend inspector socket closed outside of a reload cycle.
    #[error("inspector backend for worker `{worker}` closed: {reason}")]
    InspectorBackendClosed { worker: String, reason: String },

    /// No worker with this name has been started.
    #[error("unknown worker `{0}`")]
    UnknownWorker(String),

    /// Proxy data carried by a reload completion could not be turned into a destination.
    #[error("invalid destination: {0}")]
    InvalidDestination(String),

    /// The worker's sequential task is no longer running.
    #[error("worker `{0}` has stopped")]
    WorkerStopped(String),

    /// A listening endpoint could not be bound.
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },
}

/// Result type for proxy operations.
pub type ProxyResult<T> = Result<T, ProxyError>;

impl ProxyError {
    /// HTTP status used when this error is rendered to a client.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::RequestAborted { .. } | ProxyError::WorkerStopped(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ProxyError::UpstreamUnavailable { .. } => StatusCode::BAD_GATEWAY,
            ProxyError::UnknownWorker(_) => StatusCode::NOT_FOUND,
            ProxyError::InvalidDestination(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        (self.status_code(), self.to_string()).into_response()
    }
}
