//! WebSocket server: accept loop and per-connection upgrade.
//!
//! # Responsibilities
//! - Accept TCP connections (bounded by the listener's permits)
//! - Retry failed accepts with backoff instead of dying
//! - Run the opening handshake under a deadline, answering 400 on failure
//! - Spawn one session task per upgraded connection
//! - Apply hot-reloaded handshake policy to new connections
//! - On shutdown: stop accepting, close sessions with 1001, drain

use arc_swap::ArcSwap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::sync::{broadcast, mpsc};
use tokio_util::codec::FramedRead;

use crate::config::ServerConfig;
use crate::http::{read_request, switching_protocols, write_rejection};
use crate::net::connection::ConnectionTracker;
use crate::net::listener::{ConnectionPermit, Listener, ListenerError};
use crate::observability::metrics;
use crate::protocol::{negotiate, FrameCodec, HandshakePolicy};
use crate::resilience::AcceptBackoff;
use crate::ws::handler::MessageHandler;
use crate::ws::registry::ConnectionRegistry;
use crate::ws::session::{ConnectionSession, SessionEnd, SessionLoop, SessionSettings};

/// Error that ends [`WebSocketServer::run`].
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error("accept failed {attempts} times in a row: {source}")]
    AcceptExhausted {
        attempts: u32,
        #[source]
        source: ListenerError,
    },
}

/// Everything a connection task needs, snapshotted at accept time.
#[derive(Clone)]
pub struct ConnectionContext {
    pub policy: Arc<HandshakePolicy>,
    pub registry: Arc<ConnectionRegistry>,
    pub handler: Arc<dyn MessageHandler>,
    pub settings: SessionSettings,
    pub handshake_timeout: Duration,
    pub max_handshake_bytes: usize,
    pub max_frame_size: usize,
}

impl ConnectionContext {
    pub fn new(
        config: &ServerConfig,
        policy: Arc<HandshakePolicy>,
        registry: Arc<ConnectionRegistry>,
        handler: Arc<dyn MessageHandler>,
    ) -> Self {
        Self {
            policy,
            registry,
            handler,
            settings: SessionSettings::from_config(config),
            handshake_timeout: Duration::from_millis(config.timeouts.handshake_ms),
            max_handshake_bytes: config.websocket.max_handshake_bytes,
            max_frame_size: config.websocket.max_frame_size,
        }
    }
}

/// WebSocket server bound to one listener.
pub struct WebSocketServer {
    config: ServerConfig,
    last_applied: ArcSwap<ServerConfig>,
    policy: Arc<ArcSwap<HandshakePolicy>>,
    registry: Arc<ConnectionRegistry>,
    handler: Arc<dyn MessageHandler>,
    tracker: ConnectionTracker,
    config_updates: Option<mpsc::UnboundedReceiver<ServerConfig>>,
}

impl WebSocketServer {
    pub fn new(config: ServerConfig, handler: Arc<dyn MessageHandler>) -> Self {
        let policy = HandshakePolicy::from_config(&config.websocket);
        Self {
            last_applied: ArcSwap::from_pointee(config.clone()),
            config,
            policy: Arc::new(ArcSwap::from_pointee(policy)),
            registry: Arc::new(ConnectionRegistry::new()),
            handler,
            tracker: ConnectionTracker::new(),
            config_updates: None,
        }
    }

    /// Feed reloaded configurations (from [`crate::config::ConfigWatcher`]).
    pub fn with_config_updates(mut self, updates: mpsc::UnboundedReceiver<ServerConfig>) -> Self {
        self.config_updates = Some(updates);
        self
    }

    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        Arc::clone(&self.registry)
    }

    /// Handshake policy new connections negotiate against.
    pub fn policy(&self) -> Arc<HandshakePolicy> {
        self.policy.load_full()
    }

    pub fn tracker(&self) -> ConnectionTracker {
        self.tracker.clone()
    }

    /// Swap in the handshake policy from a reloaded config.
    ///
    /// Returns true when the reload also changed fields that only take
    /// effect after a restart.
    pub fn apply_config(&self, new_config: &ServerConfig) -> bool {
        let policy = HandshakePolicy::from_config(&new_config.websocket);
        tracing::info!(
            path = %policy.path,
            allowed_origin = %policy.allowed_origin,
            allowed_protocols = ?policy.allowed_protocols,
            allowed_extensions = ?policy.allowed_extensions,
            "Handshake policy reloaded"
        );
        self.policy.store(Arc::new(policy));

        let previous = self.last_applied.swap(Arc::new(new_config.clone()));
        let restart_required = restart_only_changed(&previous, new_config);
        if restart_required {
            tracing::warn!("Config changes outside the handshake policy require a restart");
        }
        restart_required
    }

    /// Accept connections until `shutdown` fires, then drain.
    pub async fn run(
        mut self,
        listener: Listener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ServerError> {
        let (session_shutdown, _) = broadcast::channel::<()>(1);
        let mut backoff = AcceptBackoff::new(&self.config.accept_retry);

        tracing::info!(
            address = ?listener.local_addr().ok(),
            path = %self.config.websocket.path,
            "WebSocket server accepting connections"
        );

        let result: Result<(), ServerError> = loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("Shutdown signal received, stopping accept loop");
                    break Ok(());
                }
                update = recv_update(&mut self.config_updates) => match update {
                    Some(new_config) => {
                        self.apply_config(&new_config);
                    }
                    None => self.config_updates = None,
                },
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer_addr, permit)) => {
                        backoff.on_success();
                        self.spawn_connection(stream, peer_addr, permit, session_shutdown.subscribe());
                    }
                    Err(ListenerError::LimiterClosed) => break Err(ListenerError::LimiterClosed.into()),
                    Err(e) => match backoff.on_failure() {
                        Some(delay) => {
                            tracing::error!(
                                error = %e,
                                attempt = backoff.failures(),
                                delay_ms = delay.as_millis() as u64,
                                "Accept failed, retrying"
                            );
                            tokio::time::sleep(delay).await;
                        }
                        None => {
                            tracing::error!(error = %e, attempts = backoff.failures(), "Accept retries exhausted");
                            break Err(ServerError::AcceptExhausted {
                                attempts: backoff.failures(),
                                source: e,
                            });
                        }
                    },
                },
            }
        };

        drop(listener);
        let open = self.registry.len();
        if session_shutdown.send(()).is_err() {
            tracing::debug!("No sessions to notify");
        }

        let drain = Duration::from_millis(self.config.timeouts.drain_ms);
        if self.tracker.wait_for_drain(drain).await {
            tracing::info!(sessions = open, "All connections drained");
        } else {
            tracing::warn!(
                remaining = self.tracker.active_count(),
                "Drain timeout reached, abandoning remaining connections"
            );
        }
        result
    }

    fn spawn_connection<S>(
        &self,
        stream: S,
        peer_addr: SocketAddr,
        permit: ConnectionPermit,
        shutdown: broadcast::Receiver<()>,
    ) where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let ctx = ConnectionContext::new(
            &self.config,
            self.policy.load_full(),
            Arc::clone(&self.registry),
            Arc::clone(&self.handler),
        );
        let guard = self.tracker.track();

        tokio::spawn(async move {
            let _guard = guard;
            let _permit = permit;
            serve_connection(stream, Some(peer_addr), ctx, Some(shutdown)).await;
        });
    }
}

/// Run one connection from raw socket to `Closed`.
///
/// Returns `None` when the handshake was rejected (no session was created).
pub async fn serve_connection<S>(
    stream: S,
    peer_addr: Option<SocketAddr>,
    ctx: ConnectionContext,
    shutdown: Option<broadcast::Receiver<()>>,
) -> Option<SessionEnd>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read_half, mut write_half) = tokio::io::split(stream);
    let mut reader = BufReader::new(read_half);

    let head = tokio::time::timeout(
        ctx.handshake_timeout,
        read_request(&mut reader, ctx.max_handshake_bytes),
    )
    .await;

    let rejection = match head {
        Ok(Ok(request)) => match negotiate(&request, &ctx.policy) {
            Ok(descriptor) => Ok(descriptor),
            Err(e) => {
                tracing::warn!(peer_addr = ?peer_addr, reason = e.reason(), error = %e, "Handshake rejected");
                Err(e.reason())
            }
        },
        Ok(Err(e)) => {
            tracing::warn!(peer_addr = ?peer_addr, error = %e, "Malformed upgrade request");
            Err("malformed_request")
        }
        Err(_) => {
            tracing::warn!(peer_addr = ?peer_addr, "Handshake timed out");
            Err("timeout")
        }
    };

    let descriptor = match rejection {
        Ok(descriptor) => descriptor,
        Err(reason) => {
            metrics::record_handshake(reason);
            if let Err(e) = write_rejection(&mut write_half).await {
                tracing::debug!(peer_addr = ?peer_addr, error = %e, "Failed to send 400");
            }
            return None;
        }
    };

    let session = Arc::new(
        ConnectionSession::new(&descriptor, peer_addr, write_half)
            .with_write_timeout(ctx.settings.write_timeout),
    );
    let response = switching_protocols(&descriptor);
    if let Err(e) = session.write_raw(response.as_bytes()).await {
        tracing::debug!(connection_id = %descriptor.id, error = %e, "Failed to send 101");
        session.finalize().await;
        return None;
    }

    session.mark_open();
    ctx.registry.add(&session);
    metrics::record_handshake("accepted");
    metrics::record_session_opened();
    tracing::info!(
        connection_id = %descriptor.id,
        peer_addr = ?peer_addr,
        protocol = ?descriptor.protocol,
        extensions = ?descriptor.extensions,
        "WebSocket session opened"
    );

    let frames = FramedRead::new(reader, FrameCodec::with_max_frame_size(ctx.max_frame_size));
    let mut session_loop =
        SessionLoop::new(frames, session, ctx.registry, ctx.handler, ctx.settings);
    if let Some(shutdown) = shutdown {
        session_loop = session_loop.with_shutdown(shutdown);
    }
    Some(session_loop.run().await)
}

/// Compare everything except the hot-reloadable handshake policy.
fn restart_only_changed(previous: &ServerConfig, next: &ServerConfig) -> bool {
    let mut masked = next.clone();
    masked.websocket.path = previous.websocket.path.clone();
    masked.websocket.allowed_origin = previous.websocket.allowed_origin.clone();
    masked.websocket.allowed_protocols = previous.websocket.allowed_protocols.clone();
    masked.websocket.allowed_extensions = previous.websocket.allowed_extensions.clone();
    masked != *previous
}

async fn recv_update(
    updates: &mut Option<mpsc::UnboundedReceiver<ServerConfig>>,
) -> Option<ServerConfig> {
    match updates {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
