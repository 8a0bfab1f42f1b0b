//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept, connection limits)
//!     → connection.rs (identity, drain tracking)
//!     → Hand off to the ws layer (handshake + session)
//!
//! Connection States:
//!     Accepting → Handshaking → Open → Closing → Closed
//! ```
//!
//! # Design Decisions
//! - Bounded accept prevents resource exhaustion
//! - Each connection task is tracked for graceful shutdown

pub mod connection;
pub mod listener;
