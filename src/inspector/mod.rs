//! Inspector proxy.
//!
//! # Data Flow
//! ```text
//! DevTools client
//!     → GET /json (discovery.rs: live workers → target records)
//!     → WS /<marker>:<worker> (tunnel.rs: upgrade)
//!     → InspectorBridge (bridge.rs)
//!         ↔ runtime inspector of the live generation
//!         ↺ rebinds on every change of the worker's live destination
//! ```
//!
//! # Design Decisions
//! - Clients connect to a stable address; the backend behind it changes
//! - Client sockets survive reloads; only a crash of a live backend closes them

pub mod bridge;
pub mod discovery;
pub mod tunnel;

pub use bridge::{BridgeExit, BridgeSettings, InspectorBridge, BACKEND_CLOSED_CODE, GOING_AWAY_CODE};
pub use discovery::{InspectorTarget, VersionInfo};
pub use tunnel::{router, InspectorState};
