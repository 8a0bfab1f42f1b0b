//! HTTP/1.1 upgrade plumbing.
//!
//! # Data Flow
//! ```text
//! Accepted TCP socket
//!     → request.rs (bounded head read, header map)
//!     → [protocol::handshake validates and negotiates]
//!     → response.rs (101 Switching Protocols or 400 Bad Request)
//!     → socket handed to the frame layer, or closed
//! ```
//!
//! # Design Decisions
//! - Only the subset of HTTP needed for the upgrade is implemented
//! - The reader is never discarded: buffered bytes after the head belong to
//!   the first WebSocket frame

pub mod request;
pub mod response;

pub use request::{read_request, Headers, RequestError, UpgradeRequest};
pub use response::{switching_protocols, write_rejection};
