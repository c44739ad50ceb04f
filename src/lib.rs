//! Local development proxy controller.
//!
//! Keeps application traffic and debugger sessions pointed at whichever
//! runtime instance of a worker is currently live, across reloads.
//!
//! # Architecture Overview
//!
//! ```text
//!                       ┌──────────────────────────────────────────────┐
//!   lifecycle events    │               PROXY CONTROLLER                │
//!   ────────────────────┼─▶ controller ──▶ registry (per-worker tasks)  │
//!                       │                      │ live destination (watch)│
//!   HTTP requests       │                      ▼                         │
//!   ────────────────────┼─▶ http entry ──▶ proxy (buffer / forward) ────┼──▶ runtime
//!                       │                                                │
//!   DevTools clients    │                                                │
//!   ────────────────────┼─▶ inspector (/json, tunnel) ──▶ bridge ───────┼──▶ runtime inspector
//!                       │                                                │
//!                       │  config · observability · resilience · lifecycle│
//!                       └──────────────────────────────────────────────┘
//! ```

// Core subsystems
pub mod controller;
pub mod events;
pub mod inspector;
pub mod proxy;
pub mod registry;

// Entry points
pub mod http;

// Cross-cutting concerns
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use config::ProxyConfig;
pub use controller::{BoundAddrs, ProxyController, WorkerHandle};
pub use error::{ProxyError, ProxyResult};
pub use events::{BundleDescriptor, ConfigUpdate, ProxyEvent, ReloadComplete, ReloadStart, WorkerConfig};
pub use lifecycle::Shutdown;
pub use registry::{Destination, DestinationUrl, Generation, LiveDestination, ProxyData, WorkerName};
