//! Per-worker sequential task.
//!
//! # Responsibilities
//! - Own the worker's `WorkerRecord`; nothing else mutates it
//! - Apply lifecycle events and request admissions in delivery order
//! - Publish the live destination on a watch channel for lock-free readers
//!
//! Every command is handled without awaiting I/O, so event ingestion stays
//! fast no matter how many requests are buffered.

use tokio::sync::{mpsc, oneshot, watch};

use crate::error::{ProxyError, ProxyResult};
use crate::events::{BundleDescriptor, ReloadComplete, WorkerConfig};
use crate::observability::metrics;
use crate::proxy::pending::{PendingRequest, RequestSeq};
use crate::registry::{
    Destination, Enqueued, Generation, LiveDestination, WorkerName, WorkerRecord, WorkerStatus,
};

/// Commands accepted by a worker task.
#[derive(Debug)]
pub enum WorkerCommand {
    ConfigUpdate(WorkerConfig),
    ReloadStart {
        config: WorkerConfig,
        bundle: BundleDescriptor,
        reply: Option<oneshot::Sender<Generation>>,
    },
    ReloadComplete(ReloadComplete),
    Acquire(PendingRequest),
    Cancel(RequestSeq),
    Status(oneshot::Sender<WorkerStatus>),
    Shutdown,
}

/// Cloneable handle to a running worker task.
#[derive(Debug, Clone)]
pub struct WorkerSlot {
    name: WorkerName,
    commands: mpsc::UnboundedSender<WorkerCommand>,
    live: watch::Receiver<Option<LiveDestination>>,
}

impl WorkerSlot {
    pub fn name(&self) -> &WorkerName {
        &self.name
    }

    /// Queue a command behind everything already sent for this worker.
    pub fn send(&self, command: WorkerCommand) -> ProxyResult<()> {
        self.commands
            .send(command)
            .map_err(|_| ProxyError::WorkerStopped(self.name.to_string()))
    }

    /// Snapshot of the live destination. May be outdated as soon as it returns.
    pub fn current(&self) -> Option<LiveDestination> {
        self.live.borrow().clone()
    }

    /// Receiver notified whenever the live destination changes.
    pub fn subscribe(&self) -> watch::Receiver<Option<LiveDestination>> {
        self.live.clone()
    }

    pub async fn status(&self) -> ProxyResult<WorkerStatus> {
        let (tx, rx) = oneshot::channel();
        self.send(WorkerCommand::Status(tx))?;
        rx.await
            .map_err(|_| ProxyError::WorkerStopped(self.name.to_string()))
    }
}

/// Spawn the task for `name` and return its handle.
pub fn spawn(name: WorkerName) -> WorkerSlot {
    let (commands, command_rx) = mpsc::unbounded_channel();
    let (live_tx, live) = watch::channel(None);

    let task = WorkerTask {
        record: WorkerRecord::new(name.clone()),
        commands: command_rx,
        live: live_tx,
    };
    tokio::spawn(task.run());

    tracing::debug!(worker = %name, "Worker task started");
    WorkerSlot {
        name,
        commands,
        live,
    }
}

struct WorkerTask {
    record: WorkerRecord,
    commands: mpsc::UnboundedReceiver<WorkerCommand>,
    live: watch::Sender<Option<LiveDestination>>,
}

impl WorkerTask {
    async fn run(mut self) {
        while let Some(command) = self.commands.recv().await {
            if matches!(command, WorkerCommand::Shutdown) {
                break;
            }
            self.handle(command);
            self.publish();
        }

        let abandoned = self.record.abandon_pending();
        self.live.send_replace(None);
        metrics::record_buffered(self.record.name().as_str(), 0);
        tracing::debug!(worker = %self.record.name(), abandoned, "Worker task stopped");
    }

    fn handle(&mut self, command: WorkerCommand) {
        let worker = self.record.name().clone();
        match command {
            WorkerCommand::ConfigUpdate(config) => {
                if self.record.update_config(config) {
                    tracing::info!(worker = %worker, "Worker config updated");
                } else {
                    tracing::debug!(worker = %worker, "Worker config unchanged");
                }
            }
            WorkerCommand::ReloadStart {
                config,
                bundle,
                reply,
            } => {
                let generation = self.record.begin_reload(config, bundle);
                metrics::record_reload(worker.as_str(), "started");
                tracing::info!(
                    worker = %worker,
                    generation = %generation,
                    pending = self.record.pending_len(),
                    "Reload started, buffering requests"
                );
                if let Some(reply) = reply {
                    let _ = reply.send(generation);
                }
            }
            WorkerCommand::ReloadComplete(event) => self.complete(event),
            WorkerCommand::Acquire(request) => {
                if let Enqueued::Buffered { position } = self.record.enqueue(request) {
                    tracing::debug!(
                        worker = %worker,
                        position,
                        state = ?self.record.state(),
                        "Request buffered"
                    );
                }
                metrics::record_buffered(worker.as_str(), self.record.pending_len());
            }
            WorkerCommand::Cancel(seq) => {
                if self.record.cancel(seq) {
                    tracing::debug!(worker = %worker, "Buffered request cancelled");
                }
                metrics::record_buffered(worker.as_str(), self.record.pending_len());
            }
            WorkerCommand::Status(reply) => {
                let _ = reply.send(self.record.status());
            }
            WorkerCommand::Shutdown => {}
        }
    }

    fn complete(&mut self, event: ReloadComplete) {
        let worker = self.record.name().clone();

        let Some(generation) = self.record.resolve_generation(event.generation, &event.bundle) else {
            metrics::record_reload(worker.as_str(), "stale");
            tracing::debug!(
                worker = %worker,
                current = %self.record.generation(),
                "Ignoring reload completion for an outdated bundle"
            );
            return;
        };

        let destination = match Destination::from_proxy_data(&event.proxy_data) {
            Ok(destination) => destination,
            Err(e) => {
                tracing::warn!(worker = %worker, error = %e, "Rejecting reload completion");
                return;
            }
        };
        let url = destination.url.clone();

        match self.record.complete_reload(generation, destination) {
            Ok(installed) => {
                self.record.update_config(event.config);
                metrics::record_reload(worker.as_str(), "completed");
                metrics::record_buffered(worker.as_str(), 0);
                for waited in &installed.waited {
                    metrics::record_buffer_wait(worker.as_str(), *waited);
                }
                let longest_wait = installed.waited.iter().max().copied().unwrap_or_default();
                tracing::info!(
                    worker = %worker,
                    generation = %installed.generation,
                    flushed = installed.flushed,
                    longest_wait_ms = longest_wait.as_millis() as u64,
                    url = %url,
                    "Reload complete, destination live"
                );
            }
            Err(e @ ProxyError::StaleReload { .. }) => {
                metrics::record_reload(worker.as_str(), "stale");
                tracing::debug!(worker = %worker, error = %e, "Discarding stale reload completion");
            }
            Err(e @ ProxyError::UnknownGeneration { .. }) => {
                metrics::record_reload(worker.as_str(), "unknown");
                tracing::warn!(worker = %worker, error = %e, "Ignoring completion for an unknown generation");
            }
            Err(e) => {
                tracing::warn!(worker = %worker, error = %e, "Reload completion failed");
            }
        }
    }

    fn publish(&self) {
        let next = self.record.current_destination().cloned();
        self.live.send_if_modified(|current| {
            if *current != next {
                *current = next;
                true
            } else {
                false
            }
        });
    }
}
