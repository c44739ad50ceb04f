//! Request proxy for application traffic.
//!
//! # Data Flow
//! ```text
//! WorkerHandle::fetch / HTTP entry point
//!     → forward.rs (Acquire → worker task)
//!     → live: immediate admission
//!       reloading: pending.rs queue, woken on reload completion in FIFO order
//!     → rewrite + forward to destination (hyper client)
//!     → response streamed back verbatim
//! ```

pub mod forward;
pub mod pending;

pub use forward::{rewrite_request, RequestProxy};
pub use pending::{Admission, PendingRequest, RequestSeq};
