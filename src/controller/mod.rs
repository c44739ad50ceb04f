//! Proxy controller façade.
//!
//! # Responsibilities
//! - Own the registry, the request proxy and both listening endpoints
//! - Route lifecycle events to the right worker task, in delivery order
//! - Signal readiness once the entry and inspector listeners accept connections
//! - Tear everything down on request
//!
//! # Data Flow
//! ```text
//! configUpdate / reloadStart / reloadComplete
//!     → ProxyController::dispatch
//!     → DestinationRegistry::get_or_spawn(worker)
//!     → WorkerSlot command channel (worker.rs)
//!
//! WorkerHandle::fetch / entry listener
//!     → RequestProxy (buffer until live) → destination
//!
//! inspector listener
//!     → discovery + tunnel (inspector::tunnel) → InspectorBridge
//! ```

pub mod handle;
pub mod worker;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderName;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::JoinHandle;

use crate::config::ProxyConfig;
use crate::error::{ProxyError, ProxyResult};
use crate::events::{ConfigUpdate, ProxyEvent, ReloadComplete, ReloadStart, WorkerConfig};
use crate::http::{entry_router, spawn_server, EntryState, WorkerSelector};
use crate::inspector::{self, InspectorState};
use crate::lifecycle::Shutdown;
use crate::proxy::RequestProxy;
use crate::registry::{DestinationRegistry, Generation, LiveDestination, WorkerName, WorkerStatus};

pub use handle::WorkerHandle;
pub use worker::{WorkerCommand, WorkerSlot};

/// How long teardown waits for each server to finish draining.
const SERVER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Addresses the controller is listening on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundAddrs {
    pub entry: SocketAddr,
    pub inspector: Option<SocketAddr>,
}

/// Composes the destination registry, request proxy and inspector proxy.
///
/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct ProxyController {
    inner: Arc<Inner>,
}

struct Inner {
    config: ProxyConfig,
    registry: Arc<DestinationRegistry>,
    proxy: RequestProxy,
    selector: WorkerSelector,
    shutdown: Shutdown,
    ready: watch::Sender<bool>,
    bound: Mutex<Option<BoundAddrs>>,
    servers: Mutex<Vec<JoinHandle<()>>>,
    torn_down: AtomicBool,
}

impl ProxyController {
    pub fn new(config: ProxyConfig) -> Self {
        let proxy = RequestProxy::new(config.timeouts.buffer(), config.timeouts.connect());
        let header = HeaderName::from_bytes(config.listener.worker_header.as_bytes())
            .unwrap_or_else(|_| {
                tracing::warn!(
                    header = %config.listener.worker_header,
                    "Invalid worker header, using x-worker-name"
                );
                HeaderName::from_static("x-worker-name")
            });
        let selector = WorkerSelector {
            header,
            default_worker: config.listener.default_worker.clone(),
        };
        let (ready, _) = watch::channel(false);

        Self {
            inner: Arc::new(Inner {
                config,
                registry: Arc::new(DestinationRegistry::new()),
                proxy,
                selector,
                shutdown: Shutdown::new(),
                ready,
                bound: Mutex::new(None),
                servers: Mutex::new(Vec::new()),
                torn_down: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &Arc<DestinationRegistry> {
        &self.inner.registry
    }

    /// Bind the entry and inspector listeners and start serving.
    ///
    /// Idempotent: a second call returns the addresses bound by the first.
    pub async fn start(&self) -> ProxyResult<BoundAddrs> {
        let mut bound = self.inner.bound.lock().await;
        if let Some(addrs) = *bound {
            return Ok(addrs);
        }
        if self.inner.torn_down.load(Ordering::SeqCst) {
            return Err(ProxyError::WorkerStopped("(controller)".to_string()));
        }

        let config = &self.inner.config;
        let (entry_listener, entry) = bind(&config.listener.bind_address).await?;
        let inspector_listener = if config.inspector.enabled {
            Some(bind(&config.inspector.bind_address).await?)
        } else {
            None
        };

        let mut servers = self.inner.servers.lock().await;
        let entry_state = EntryState {
            registry: self.inner.registry.clone(),
            proxy: self.inner.proxy.clone(),
            selector: self.inner.selector.clone(),
        };
        servers.push(spawn_server(
            "entry",
            entry_listener,
            entry_router(entry_state),
            &self.inner.shutdown,
        ));

        let inspector = match inspector_listener {
            Some((listener, addr)) => {
                let state = InspectorState::new(
                    self.inner.registry.clone(),
                    config,
                    self.inner.shutdown.clone(),
                    addr.to_string(),
                );
                servers.push(spawn_server(
                    "inspector",
                    listener,
                    inspector::router(state),
                    &self.inner.shutdown,
                ));
                Some(addr)
            }
            None => None,
        };

        let addrs = BoundAddrs { entry, inspector };
        *bound = Some(addrs);
        self.inner.ready.send_replace(true);
        tracing::info!(entry = %entry, inspector = ?inspector, "Proxy controller ready");
        Ok(addrs)
    }

    /// Resolves once `start` has bound every listener.
    pub async fn ready(&self) {
        let mut ready = self.inner.ready.subscribe();
        if ready.wait_for(|ready| *ready).await.is_err() {
            tracing::debug!("Readiness channel closed");
        }
    }

    pub fn is_ready(&self) -> bool {
        *self.inner.ready.borrow()
    }

    /// Register a worker and return a handle for sending it requests.
    ///
    /// Requests sent before its first reload completes are buffered.
    pub fn start_worker(&self, config: WorkerConfig) -> ProxyResult<WorkerHandle> {
        let slot = self.slot(&config.name)?;
        slot.send(WorkerCommand::ConfigUpdate(config))?;
        Ok(WorkerHandle::new(slot, self.inner.proxy.clone()))
    }

    /// Handle for an already registered worker.
    pub fn worker(&self, name: &str) -> Option<WorkerHandle> {
        self.inner
            .registry
            .get(name)
            .map(|slot| WorkerHandle::new(slot, self.inner.proxy.clone()))
    }

    pub fn on_config_update(&self, event: ConfigUpdate) -> ProxyResult<()> {
        self.slot(&event.config.name)?
            .send(WorkerCommand::ConfigUpdate(event.config))
    }

    /// Stop routing to the worker's destination; new requests buffer.
    pub fn on_reload_start(&self, event: ReloadStart) -> ProxyResult<()> {
        self.slot(&event.config.name)?.send(WorkerCommand::ReloadStart {
            config: event.config,
            bundle: event.bundle,
            reply: None,
        })
    }

    /// Like `on_reload_start`, returning the generation the reload allocated.
    pub async fn begin_reload(&self, event: ReloadStart) -> ProxyResult<Generation> {
        let slot = self.slot(&event.config.name)?;
        let (reply, generation) = oneshot::channel();
        slot.send(WorkerCommand::ReloadStart {
            config: event.config,
            bundle: event.bundle,
            reply: Some(reply),
        })?;
        generation
            .await
            .map_err(|_| ProxyError::WorkerStopped(slot.name().to_string()))
    }

    /// Install the new destination if the completion is current; stale ones
    /// are discarded and buffered requests keep waiting.
    pub fn on_reload_complete(&self, event: ReloadComplete) -> ProxyResult<()> {
        self.slot(&event.config.name)?
            .send(WorkerCommand::ReloadComplete(event))
    }

    pub fn dispatch(&self, event: ProxyEvent) -> ProxyResult<()> {
        tracing::debug!(worker = %event.worker_name(), event = event.kind(), "Lifecycle event");
        match event {
            ProxyEvent::ConfigUpdate(e) => self.on_config_update(e),
            ProxyEvent::ReloadStart(e) => self.on_reload_start(e),
            ProxyEvent::ReloadComplete(e) => self.on_reload_complete(e),
        }
    }

    pub fn current_destination(&self, worker: &str) -> Option<LiveDestination> {
        self.inner.registry.current_destination(worker)
    }

    pub async fn status(&self, worker: &str) -> ProxyResult<WorkerStatus> {
        let slot = self
            .inner
            .registry
            .get(worker)
            .ok_or_else(|| ProxyError::UnknownWorker(worker.to_string()))?;
        slot.status().await
    }

    /// Stop listeners, stop every worker task and close inspector clients.
    ///
    /// Buffered requests fail with `RequestAborted`. Safe to call twice.
    pub async fn teardown(&self) {
        if self.inner.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("Tearing down proxy controller");

        self.inner.shutdown.trigger();
        for slot in self.inner.registry.drain() {
            let _ = slot.send(WorkerCommand::Shutdown);
        }

        let servers = std::mem::take(&mut *self.inner.servers.lock().await);
        for server in servers {
            let abort = server.abort_handle();
            if tokio::time::timeout(SERVER_DRAIN_TIMEOUT, server).await.is_err() {
                tracing::warn!("Server did not drain in time, aborting");
                abort.abort();
            }
        }
        tracing::info!("Proxy controller stopped");
    }

    fn slot(&self, name: &WorkerName) -> ProxyResult<WorkerSlot> {
        if self.inner.torn_down.load(Ordering::SeqCst) {
            return Err(ProxyError::WorkerStopped(name.to_string()));
        }
        Ok(self.inner.registry.get_or_spawn(name))
    }
}

async fn bind(address: &str) -> ProxyResult<(TcpListener, SocketAddr)> {
    let bind_error = |source: std::io::Error| ProxyError::Bind {
        address: address.to_string(),
        source,
    };
    let listener = TcpListener::bind(address).await.map_err(bind_error)?;
    let local = listener.local_addr().map_err(bind_error)?;
    Ok((listener, local))
}
