//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! accept() fails:
//!     → backoff.rs (count consecutive failures, compute delay)
//!     → sleep, retry; give up only when the configured budget is spent
//! accept() succeeds:
//!     → backoff resets
//! ```
//!
//! # Design Decisions
//! - Per-connection deadlines (handshake, close) live with the session
//!   code that enforces them; this module only covers the accept loop

pub mod backoff;

pub use backoff::{calculate_backoff, AcceptBackoff};
