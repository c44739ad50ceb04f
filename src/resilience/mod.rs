//! Resilience helpers.
//!
//! Application requests are never retried: a live destination that fails is
//! reported as such. Only inspector backends are redialed, because a freshly
//! started runtime may open its inspector socket slightly after it reports
//! ready.

pub mod backoff;

pub use backoff::{calculate_backoff, Backoff};
