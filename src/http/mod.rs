//! Forwarding entry point.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, tracing)
//!     → request.rs (pick the worker from header / default / sole worker)
//!     → proxy::RequestProxy (buffer while reloading, then forward)
//!     → response streamed back unchanged
//! ```

pub mod request;
pub mod server;

pub use request::{MakeRequestUuid, WorkerSelector, X_REQUEST_ID};
pub use server::{entry_router, spawn_server, EntryState};
