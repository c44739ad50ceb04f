//! Request forwarding with buffering across reloads.
//!
//! # Responsibilities
//! - Ask the worker task for an admission (live now, or after the next reload)
//! - Bound the wait for a live destination by a deadline; cancel cleanly on
//!   timeout or drop
//! - Rewrite the request for the destination and stream the response back
//!
//! # Design Decisions
//! - The destination is taken from the admission, never from a cached snapshot
//! - Admitted requests are handed to the client in arrival order; the turn
//!   passes once hyper has written the request, never on the response
//! - Transport failures against a live destination are surfaced, not retried
//!   and not re-buffered

use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{
    header::{self, HeaderName},
    uri::{PathAndQuery, Scheme},
    HeaderMap, Request, Response, Uri,
};
use http_body_util::BodyExt;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};

use crate::controller::worker::{WorkerCommand, WorkerSlot};
use crate::error::{ProxyError, ProxyResult};
use crate::observability::metrics;
use crate::proxy::pending::{Admission, PendingRequest, RequestSeq, Turn};
use crate::registry::Destination;

/// Headers that describe a single hop and are never forwarded.
const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    HeaderName::from_static("proxy-connection"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
];

/// Forwards application requests to whichever destination is live.
#[derive(Clone)]
pub struct RequestProxy {
    client: Client<HttpConnector, Body>,
    buffer_timeout: Duration,
}

impl RequestProxy {
    pub fn new(buffer_timeout: Duration, connect_timeout: Duration) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(connect_timeout));

        let client = Client::builder(TokioExecutor::new()).build(connector);
        Self {
            client,
            buffer_timeout,
        }
    }

    pub fn buffer_timeout(&self) -> Duration {
        self.buffer_timeout
    }

    /// Forward with the configured buffer timeout.
    pub async fn forward(&self, slot: &WorkerSlot, request: Request<Body>) -> ProxyResult<Response<Body>> {
        self.forward_with_timeout(slot, request, self.buffer_timeout).await
    }

    /// Forward, waiting at most `wait` for the worker to become live.
    ///
    /// Dropping the returned future cancels a buffered request.
    pub async fn forward_with_timeout(
        &self,
        slot: &WorkerSlot,
        request: Request<Body>,
        wait: Duration,
    ) -> ProxyResult<Response<Body>> {
        let start = Instant::now();
        let worker = slot.name().to_string();

        let admission = self.admit(slot, wait, start).await?;
        let live = admission.live.clone();
        // Only the wait for a live destination is bounded; once admitted the
        // request just takes its place behind earlier ones.
        let turn = admission.into_turn().await;
        let result = self.dispatch(&worker, &live.destination, request, turn).await;

        match &result {
            Ok(response) => metrics::record_request(&worker, response.status().as_u16(), start),
            Err(ProxyError::UpstreamUnavailable { reason, .. }) => {
                tracing::warn!(worker = %worker, error = %reason, "Upstream unavailable");
                metrics::record_request(&worker, 502, start);
            }
            Err(_) => {}
        }
        result
    }

    /// Wait for permission to forward, in arrival order.
    async fn admit(&self, slot: &WorkerSlot, wait: Duration, start: Instant) -> ProxyResult<Admission> {
        let seq = RequestSeq::next();
        let (pending, admitted) = PendingRequest::new(seq);
        slot.send(WorkerCommand::Acquire(pending))?;

        let mut guard = CancelOnDrop {
            slot,
            seq,
            armed: true,
        };
        let deadline = tokio::time::Instant::now() + wait;

        let admission = match tokio::time::timeout_at(deadline, admitted).await {
            Ok(Ok(admission)) => admission,
            Ok(Err(_)) => {
                // Worker task stopped and dropped its queue.
                guard.armed = false;
                return Err(aborted(slot, start));
            }
            Err(_) => {
                tracing::debug!(worker = %slot.name(), "Buffered request timed out");
                return Err(aborted(slot, start));
            }
        };
        guard.armed = false;
        Ok(admission)
    }

    async fn dispatch(
        &self,
        worker: &str,
        destination: &Destination,
        request: Request<Body>,
        turn: Turn,
    ) -> ProxyResult<Response<Body>> {
        let request = rewrite_request(destination, request)?;
        let request = request.map(|body| {
            // Hyper drops the body once the request is written.
            Body::new(body.map_frame(move |frame| {
                let _turn = &turn;
                frame
            }))
        });
        tracing::debug!(worker = %worker, uri = %request.uri(), "Forwarding request");

        let response: Response<hyper::body::Incoming> = self
            .client
            .request(request)
            .await
            .map_err(|e| ProxyError::UpstreamUnavailable {
                worker: worker.to_string(),
                reason: e.to_string(),
            })?;

        let (parts, body) = response.into_parts();
        Ok(Response::from_parts(parts, Body::new(body)))
    }
}

/// Sends a cancel to the worker task unless disarmed.
struct CancelOnDrop<'a> {
    slot: &'a WorkerSlot,
    seq: RequestSeq,
    armed: bool,
}

impl Drop for CancelOnDrop<'_> {
    fn drop(&mut self) {
        if self.armed {
            let _ = self.slot.send(WorkerCommand::Cancel(self.seq));
        }
    }
}

fn aborted(slot: &WorkerSlot, start: Instant) -> ProxyError {
    ProxyError::RequestAborted {
        worker: slot.name().to_string(),
        waited: start.elapsed(),
    }
}

/// Point `request` at `destination`: swap scheme and authority, keep path and
/// query, drop hop-by-hop headers, merge destination headers over the rest.
pub fn rewrite_request(destination: &Destination, request: Request<Body>) -> ProxyResult<Request<Body>> {
    let (mut parts, body) = request.into_parts();

    let path_and_query = parts
        .uri
        .path_and_query()
        .cloned()
        .unwrap_or_else(|| PathAndQuery::from_static("/"));
    let scheme = if destination.url.scheme() == "https" {
        Scheme::HTTPS
    } else {
        Scheme::HTTP
    };
    parts.uri = Uri::builder()
        .scheme(scheme)
        .authority(destination.authority().as_str())
        .path_and_query(path_and_query)
        .build()
        .map_err(|e| ProxyError::InvalidDestination(e.to_string()))?;

    strip_hop_by_hop(&mut parts.headers);
    // The client fills in Host from the new URI.
    parts.headers.remove(header::HOST);
    for (name, value) in destination.headers.iter() {
        parts.headers.insert(name.clone(), value.clone());
    }

    Ok(Request::from_parts(parts, body))
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in listed.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn destination() -> Destination {
        let mut dest = Destination::new("http://127.0.0.1:8788".parse().unwrap());
        dest.headers
            .insert("x-auth", HeaderValue::from_static("from-destination"));
        dest
    }

    #[test]
    fn test_rewrite_targets_destination() {
        let request = Request::builder()
            .uri("http://dummy/some/path?q=1")
            .header("host", "dummy")
            .header("x-auth", "from-client")
            .header("x-other", "kept")
            .header("connection", "keep-alive, x-drop-me")
            .header("x-drop-me", "1")
            .body(Body::empty())
            .unwrap();

        let rewritten = rewrite_request(&destination(), request).unwrap();
        assert_eq!(
            rewritten.uri().to_string(),
            "http://127.0.0.1:8788/some/path?q=1"
        );
        let headers = rewritten.headers();
        assert!(headers.get("host").is_none());
        assert_eq!(headers.get("x-auth").unwrap(), "from-destination");
        assert_eq!(headers.get("x-other").unwrap(), "kept");
        assert!(headers.get("connection").is_none());
        assert!(headers.get("x-drop-me").is_none());
    }

    #[test]
    fn test_rewrite_origin_form_request() {
        let request = Request::builder().uri("/").body(Body::empty()).unwrap();
        let rewritten = rewrite_request(&destination(), request).unwrap();
        assert_eq!(rewritten.uri().to_string(), "http://127.0.0.1:8788/");
    }
}
