//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Chain stages, controller, listener produce:
//!     → tracing events, parented to per-connection spans
//!     → metrics counters (bytes, chunks, TLS faults, connections)
//!
//! Consumers (installed by the binary only):
//!     → logging.rs (fmt subscriber, pretty or JSON)
//!     → metrics.rs (Prometheus scrape endpoint)
//! ```

pub mod logging;
pub mod metrics;

pub use logging::init_logging;
pub use metrics::init_metrics;
