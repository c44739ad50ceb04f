//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (ProxyController::start):
//!     Bind entry + inspector listeners → spawn servers → ready
//!
//! Shutdown (shutdown.rs):
//!     teardown() or Ctrl+C → broadcast → servers stop accepting,
//!     worker tasks abandon buffered requests, tunnels close with 1001
//! ```

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
pub use signals::shutdown_signal;
