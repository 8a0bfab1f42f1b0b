//! RFC 6455 WebSocket server library.
//!
//! # Architecture Overview
//!
//! ```text
//!                 ┌────────────────────────────────────────────────────┐
//!                 │                     WS HUB                         │
//!   TCP client    │  ┌─────────┐   ┌──────────┐   ┌────────────────┐   │
//!   ──────────────┼─▶│   net   │──▶│   http   │──▶│   protocol     │   │
//!                 │  │listener │   │ request  │   │  handshake     │   │
//!                 │  └─────────┘   └──────────┘   └───────┬────────┘   │
//!                 │                                       ▼            │
//!                 │  ┌──────────────────────────────────────────────┐  │
//!                 │  │ ws: session loop ◀── FrameCodec ── socket    │  │
//!                 │  │     handler(session, registry, message)      │  │
//!                 │  │     registry: send_to / broadcast            │  │
//!                 │  └──────────────────────────────────────────────┘  │
//!                 │                                                    │
//!                 │  config · resilience · lifecycle · observability   │
//!                 └────────────────────────────────────────────────────┘
//! ```

// Core subsystems
pub mod http;
pub mod net;
pub mod protocol;
pub mod ws;

// Cross-cutting concerns
pub mod config;
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use config::ServerConfig;
pub use lifecycle::Shutdown;
pub use protocol::{Frame, FrameCodec, Message, Opcode};
pub use ws::{ConnectionRegistry, ConnectionSession, MessageHandler, WebSocketServer};
