//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger
//!
//! Shutdown (shutdown.rs):
//!     trigger → accept loop stops
//!             → open sessions send Close 1001 (Going Away)
//!             → server waits for connections to drain (bounded)
//! ```
//!
//! # Design Decisions
//! - Ordered shutdown: stop accept, close sessions, drain
//! - Shutdown has timeout: the drain wait is bounded by timeouts.drain_ms

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
pub use signals::{spawn_signal_handler, wait_for_signal};
