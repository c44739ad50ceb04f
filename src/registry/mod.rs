//! Destination registry.
//!
//! # Data Flow
//! ```text
//! lifecycle event / request
//!     → DestinationRegistry (name → WorkerSlot, DashMap)
//!     → WorkerSlot.commands (ordered channel)
//!     → worker task owning a WorkerRecord (record.rs)
//!     → publishes LiveDestination snapshots on a watch channel
//! ```
//!
//! # Design Decisions
//! - One owned record per worker; the map only holds handles to it
//! - Readers use the published snapshot and must re-check it after awaiting
//! - Workers are independent: no ordering across names

pub mod destination;
pub mod record;

use dashmap::DashMap;

use crate::controller::worker::{self, WorkerSlot};

pub use destination::{Destination, DestinationUrl, Generation, LiveDestination, ProxyData, WorkerName};
pub use record::{Enqueued, Installed, WorkerRecord, WorkerState, WorkerStatus};

/// Map from worker name to the handle of its sequential task.
#[derive(Debug, Default)]
pub struct DestinationRegistry {
    workers: DashMap<WorkerName, WorkerSlot>,
}

impl DestinationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle for `name`, spawning its task on first use.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn get_or_spawn(&self, name: &WorkerName) -> WorkerSlot {
        if let Some(slot) = self.workers.get(name) {
            return slot.clone();
        }
        self.workers
            .entry(name.clone())
            .or_insert_with(|| worker::spawn(name.clone()))
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<WorkerSlot> {
        self.workers
            .get(&WorkerName::from(name))
            .map(|slot| slot.clone())
    }

    /// Momentary snapshot of the live destination for `name`.
    pub fn current_destination(&self, name: &str) -> Option<LiveDestination> {
        self.get(name).and_then(|slot| slot.current())
    }

    /// Every worker that currently has a live destination, sorted by name.
    pub fn live_workers(&self) -> Vec<(WorkerName, LiveDestination)> {
        let mut live: Vec<_> = self
            .workers
            .iter()
            .filter_map(|entry| entry.value().current().map(|l| (entry.key().clone(), l)))
            .collect();
        live.sort_by(|a, b| a.0.cmp(&b.0));
        live
    }

    pub fn names(&self) -> Vec<WorkerName> {
        let mut names: Vec<_> = self.workers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Remove every worker handle, returning them for shutdown.
    pub fn drain(&self) -> Vec<WorkerSlot> {
        let names = self.names();
        names
            .into_iter()
            .filter_map(|name| self.workers.remove(&name).map(|(_, slot)| slot))
            .collect()
    }
}
