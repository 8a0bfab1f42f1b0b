//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events via tracing)
//!     → metrics.rs (counters, gauges)
//!
//! Consumers:
//!     → stdout (fmt subscriber)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Connection id is a field on every per-connection log event
//! - Metrics are cheap (atomic increments)
//! - Metrics endpoint is opt-in via config

pub mod logging;
pub mod metrics;

pub use logging::init_logging;
pub use metrics::init_metrics;
