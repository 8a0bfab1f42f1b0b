//! WebSocket protocol subsystem (RFC 6455).
//!
//! # Data Flow
//! ```text
//! Upgrade request (http::request)
//!     → handshake.rs (validate headers, negotiate protocol/extensions, accept key)
//!     → SessionDescriptor handed to the session layer
//!
//! Socket bytes
//!     → codec.rs (streaming header/length/mask/payload decode)
//!     → frame.rs (Frame, Opcode, masking)
//!     → message.rs (fragment reassembly, UTF-8 policy)
//!     → close.rs (close status parsing for Close frames)
//! ```
//!
//! # Design Decisions
//! - The codec is policy-free: it masks/unmasks according to the frame alone
//! - Masking requirements and close handshake sequencing live in the session
//! - Reserved opcodes decode to a distinct variant that is always rejected

pub mod close;
pub mod codec;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod message;

pub use close::{CloseCode, ClosePayload};
pub use codec::FrameCodec;
pub use error::{ProtocolError, WsError};
pub use frame::{apply_mask, Frame, Opcode};
pub use handshake::{compute_accept_key, negotiate, HandshakeError, HandshakePolicy, SessionDescriptor};
pub use message::{Message, Reassembler};
