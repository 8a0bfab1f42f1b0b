//! Message handlers.
//!
//! A handler runs inside the session's own task, once per complete
//! message and in arrival order. It receives the session (to reply) and the
//! registry (to reach other connections).

use bytes::Bytes;
use futures_util::future::BoxFuture;
use std::sync::Arc;

use crate::protocol::Message;
use crate::ws::registry::ConnectionRegistry;
use crate::ws::session::ConnectionSession;

/// Application callback for data messages.
pub trait MessageHandler: Send + Sync + 'static {
    /// Called with each reassembled Text or Binary message.
    fn on_message<'a>(
        &'a self,
        session: &'a Arc<ConnectionSession>,
        registry: &'a ConnectionRegistry,
        message: Message,
    ) -> BoxFuture<'a, ()>;

    /// Called for each Pong. Ignored by default.
    fn on_pong<'a>(
        &'a self,
        _session: &'a Arc<ConnectionSession>,
        _registry: &'a ConnectionRegistry,
        _payload: Bytes,
    ) -> BoxFuture<'a, ()> {
        Box::pin(async {})
    }
}

/// Sends every message back to the connection it came from.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoHandler;

impl MessageHandler for EchoHandler {
    fn on_message<'a>(
        &'a self,
        session: &'a Arc<ConnectionSession>,
        _registry: &'a ConnectionRegistry,
        message: Message,
    ) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            if let Err(e) = session.send(&message.into_frame()).await {
                tracing::debug!(connection_id = %session.id(), error = %e, "Echo failed");
            }
        })
    }
}

/// Relays every message to all other connections.
#[derive(Debug, Clone, Copy, Default)]
pub struct BroadcastHandler;

impl MessageHandler for BroadcastHandler {
    fn on_message<'a>(
        &'a self,
        session: &'a Arc<ConnectionSession>,
        registry: &'a ConnectionRegistry,
        message: Message,
    ) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let frame = message.into_frame();
            match registry.broadcast_except(session.id(), &frame).await {
                Ok(report) => tracing::trace!(
                    connection_id = %session.id(),
                    delivered = report.delivered,
                    failed = report.failed.len(),
                    "Relayed message"
                ),
                Err(e) => {
                    tracing::warn!(connection_id = %session.id(), error = %e, "Relay frame rejected")
                }
            }
        })
    }
}
