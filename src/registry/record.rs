//! Per-worker registry record.
//!
//! # Responsibilities
//! - Allocate generations on reload start
//! - Install destinations from matching reload completions, discard stale ones
//! - Hold buffered requests in arrival order and flush them on install
//!
//! The record is plain synchronous state. It is owned by exactly one worker
//! task, which gives every operation on it a single sequential path.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::error::ProxyError;
use crate::events::{BundleDescriptor, WorkerConfig};
use crate::proxy::pending::{HandOffChain, PendingRequest, RequestSeq};
use crate::registry::destination::{Destination, Generation, LiveDestination, WorkerName};

/// Lifecycle state of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    /// No reload has started yet.
    Uninitialized,
    /// A reload is in flight; requests are buffered.
    Reloading,
    /// A destination is installed and receives traffic.
    Live,
}

/// What happened to a request offered to the record.
#[derive(Debug)]
pub enum Enqueued {
    /// Worker is live; forward right away.
    Admitted,
    /// Buffered until the next matching completion.
    Buffered { position: usize },
}

/// Result of applying a reload completion.
#[derive(Debug, PartialEq, Eq)]
pub struct Installed {
    pub generation: Generation,
    pub flushed: usize,
    /// How long each flushed request had been buffered, in arrival order.
    pub waited: Vec<Duration>,
}

/// Diagnostic snapshot of a worker.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatus {
    pub name: WorkerName,
    pub state: WorkerState,
    pub generation: Generation,
    pub pending: usize,
    pub destination: Option<String>,
    pub config: Option<WorkerConfig>,
}

/// Owned routing state for one worker.
#[derive(Debug)]
pub struct WorkerRecord {
    name: WorkerName,
    generation: Generation,
    state: WorkerState,
    config: Option<WorkerConfig>,
    bundle: Option<BundleDescriptor>,
    live: Option<LiveDestination>,
    /// Last destination before the current reload. Kept for draining only.
    previous: Option<LiveDestination>,
    pending: VecDeque<PendingRequest>,
    /// Keeps admissions in arrival order until each has been handed off.
    chain: HandOffChain,
}

impl WorkerRecord {
    pub fn new(name: WorkerName) -> Self {
        Self {
            name,
            generation: Generation::default(),
            state: WorkerState::Uninitialized,
            config: None,
            bundle: None,
            live: None,
            previous: None,
            pending: VecDeque::new(),
            chain: HandOffChain::default(),
        }
    }

    pub fn name(&self) -> &WorkerName {
        &self.name
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn config(&self) -> Option<&WorkerConfig> {
        self.config.as_ref()
    }

    /// Retain the latest config. Returns true when it differs from the previous one.
    pub fn update_config(&mut self, config: WorkerConfig) -> bool {
        let changed = self.config.as_ref() != Some(&config);
        self.config = Some(config);
        changed
    }

    /// Start a reload cycle: bump the generation and stop routing to the
    /// current destination.
    pub fn begin_reload(&mut self, config: WorkerConfig, bundle: BundleDescriptor) -> Generation {
        self.generation = self.generation.next();
        self.config = Some(config);
        self.bundle = Some(bundle);
        if let Some(live) = self.live.take() {
            self.previous = Some(live);
        }
        self.state = WorkerState::Reloading;
        self.generation
    }

    /// Work out which generation a completion belongs to. An explicit
    /// generation wins; otherwise the completion belongs to the current
    /// generation only if it carries the bundle of the latest reload start.
    pub fn resolve_generation(
        &self,
        explicit: Option<Generation>,
        bundle: &BundleDescriptor,
    ) -> Option<Generation> {
        match explicit {
            Some(generation) => Some(generation),
            None if self.generation > Generation::default()
                && self.bundle.as_ref() == Some(bundle) =>
            {
                Some(self.generation)
            }
            None => None,
        }
    }

    /// Install `destination` if `generation` is current and flush the queue
    /// against it in arrival order.
    pub fn complete_reload(
        &mut self,
        generation: Generation,
        destination: Destination,
    ) -> Result<Installed, ProxyError> {
        if generation > self.generation {
            return Err(ProxyError::UnknownGeneration {
                worker: self.name.to_string(),
                received: generation,
                current: self.generation,
            });
        }
        if generation != self.generation || generation == Generation::default() {
            return Err(ProxyError::StaleReload {
                worker: self.name.to_string(),
                received: generation,
                current: self.generation,
            });
        }

        let live = LiveDestination {
            generation,
            destination: Arc::new(destination),
        };
        self.live = Some(live.clone());
        self.previous = None;
        self.state = WorkerState::Live;

        self.chain.reset();
        let mut waited = Vec::with_capacity(self.pending.len());
        for request in self.pending.drain(..) {
            if request.is_cancelled() {
                continue;
            }
            let wait = request.enqueued_at().elapsed();
            if self.chain.admit(request, &live) {
                waited.push(wait);
            }
        }
        Ok(Installed {
            generation,
            flushed: waited.len(),
            waited,
        })
    }

    pub fn current_destination(&self) -> Option<&LiveDestination> {
        self.live.as_ref()
    }

    /// Destination being drained after a reload started, if any.
    pub fn draining_destination(&self) -> Option<&LiveDestination> {
        self.previous.as_ref()
    }

    /// Offer a request. Live workers admit it at once; otherwise it joins the
    /// back of the queue.
    pub fn enqueue(&mut self, request: PendingRequest) -> Enqueued {
        self.prune_cancelled();
        match &self.live {
            Some(live) => {
                // A caller that already gave up is simply dropped.
                self.chain.admit(request, live);
                Enqueued::Admitted
            }
            None => {
                self.pending.push_back(request);
                Enqueued::Buffered {
                    position: self.pending.len(),
                }
            }
        }
    }

    /// Remove a buffered request. Returns false if it was already flushed.
    pub fn cancel(&mut self, seq: RequestSeq) -> bool {
        let before = self.pending.len();
        self.pending.retain(|request| request.seq() != seq);
        self.pending.len() != before
    }

    /// Drop every buffered request, waking their callers with a closed channel.
    pub fn abandon_pending(&mut self) -> usize {
        let count = self.pending.len();
        self.pending.clear();
        count
    }

    pub fn status(&self) -> WorkerStatus {
        WorkerStatus {
            name: self.name.clone(),
            state: self.state,
            generation: self.generation,
            pending: self.pending.len(),
            destination: self.live.as_ref().map(|l| l.destination.url.to_string()),
            config: self.config.clone(),
        }
    }

    fn prune_cancelled(&mut self) {
        self.pending.retain(|request| !request.is_cancelled());
    }
}
