//! WebSocket connection subsystem.
//!
//! # Data Flow
//! ```text
//! Listener::accept
//!     → server.rs (read HTTP head under deadline, negotiate)
//!         ├─ rejected → 400, socket closed, nothing registered
//!         └─ accepted → 101, ConnectionSession (Open), registry.add
//!     → session.rs SessionLoop
//!         ├─ Ping          → Pong (same payload)
//!         ├─ Pong          → handler.on_pong
//!         ├─ Close         → echo, Closed
//!         ├─ Text/Binary   → Reassembler → handler.on_message(session, registry, msg)
//!         └─ error / EOF   → Closed (no Close frame)
//!     → finish: registry.remove, socket shutdown (exactly once)
//! ```
//!
//! # Design Decisions
//! - One task per connection; the handler runs inline in that task, so
//!   messages from one peer are handled strictly in order
//! - Each session has its own write gate; the registry's lock is never held
//!   across a socket write
//! - Only the session task closes its socket

pub mod handler;
pub mod registry;
pub mod server;
pub mod session;

pub use handler::{BroadcastHandler, EchoHandler, MessageHandler};
pub use registry::{BroadcastReport, ConnectionRegistry, RegistryError};
pub use server::{serve_connection, ConnectionContext, ServerError, WebSocketServer};
pub use session::{
    ConnectionSession, SendError, SessionEnd, SessionLoop, SessionSettings, SessionState,
};
