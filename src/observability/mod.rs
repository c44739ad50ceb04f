//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! worker tasks, request proxy, inspector bridges
//!     → logging.rs (structured tracing events, worker/generation fields)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stdout (tracing-subscriber fmt layer)
//!     → Prometheus scrape endpoint (optional)
//! ```

pub mod logging;
pub mod metrics;
