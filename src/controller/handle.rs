//! Per-worker handle returned by `ProxyController::start_worker`.

use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, Response};

use crate::controller::worker::WorkerSlot;
use crate::error::ProxyResult;
use crate::proxy::RequestProxy;
use crate::registry::{LiveDestination, WorkerName, WorkerStatus};

/// Sends requests to one worker through the buffering proxy.
#[derive(Clone)]
pub struct WorkerHandle {
    slot: WorkerSlot,
    proxy: RequestProxy,
}

impl WorkerHandle {
    pub(crate) fn new(slot: WorkerSlot, proxy: RequestProxy) -> Self {
        Self { slot, proxy }
    }

    pub fn name(&self) -> &WorkerName {
        self.slot.name()
    }

    /// Forward `request` to the worker's live destination, waiting across a
    /// reload for at most the configured buffer timeout.
    ///
    /// Dropping the returned future while it is buffered cancels the request.
    pub async fn fetch(&self, request: Request<Body>) -> ProxyResult<Response<Body>> {
        self.proxy.forward(&self.slot, request).await
    }

    /// Like `fetch`, with an explicit limit on the buffering wait.
    pub async fn fetch_with_timeout(
        &self,
        request: Request<Body>,
        wait: Duration,
    ) -> ProxyResult<Response<Body>> {
        self.proxy.forward_with_timeout(&self.slot, request, wait).await
    }

    pub fn current_destination(&self) -> Option<LiveDestination> {
        self.slot.current()
    }

    pub async fn status(&self) -> ProxyResult<WorkerStatus> {
        self.slot.status().await
    }
}
