//! Per-connection session: shared handle and read/dispatch loop.
//!
//! # Responsibilities
//! - Own the outbound half of the socket behind a per-connection write gate
//! - Drive the lifecycle `Handshaking → Open → Closing → Closed`
//! - Answer control frames (Ping, Close) without involving the handler
//! - Reassemble fragments and hand complete messages to the handler
//! - Tear down exactly once: deregister, shut the socket, record the outcome

use bytes::Bytes;
use futures_util::StreamExt;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{broadcast, Mutex, Notify};
use tokio::time::Instant;
use tokio_util::codec::FramedRead;

use crate::config::ServerConfig;
use crate::net::connection::ConnectionId;
use crate::observability::metrics;
use crate::protocol::frame::MAX_CONTROL_PAYLOAD;
use crate::protocol::{
    CloseCode, ClosePayload, Frame, FrameCodec, Opcode, ProtocolError, Reassembler,
    SessionDescriptor, WsError,
};
use crate::ws::handler::MessageHandler;
use crate::ws::registry::ConnectionRegistry;

type BoxedWriter = Pin<Box<dyn AsyncWrite + Send>>;

const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Lifecycle state of a session.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Handshaking = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl From<u8> for SessionState {
    fn from(val: u8) -> Self {
        match val {
            0 => SessionState::Handshaking,
            1 => SessionState::Open,
            2 => SessionState::Closing,
            _ => SessionState::Closed,
        }
    }
}

/// Why an outbound write did not happen.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("session is not open")]
    Closed,

    #[error("write failed: {0}")]
    Io(#[from] io::Error),

    #[error("invalid frame: {0}")]
    InvalidFrame(#[from] ProtocolError),
}

/// Shared handle to one connection.
///
/// Held by the session loop (owner), by the registry (weakly) and by
/// handlers while they run. Every write goes through one async mutex so
/// frames from the loop, handlers and broadcasts never interleave.
pub struct ConnectionSession {
    id: ConnectionId,
    origin: Option<String>,
    protocol: Option<String>,
    extensions: Vec<String>,
    peer_addr: Option<SocketAddr>,
    state: AtomicU8,
    writer: Mutex<Option<BoxedWriter>>,
    write_timeout: Duration,
    write_failed: AtomicBool,
    finalized: AtomicBool,
    signal: Notify,
}

impl ConnectionSession {
    /// Create a session in `Handshaking` from a negotiated descriptor.
    pub fn new<W>(descriptor: &SessionDescriptor, peer_addr: Option<SocketAddr>, writer: W) -> Self
    where
        W: AsyncWrite + Send + 'static,
    {
        Self {
            id: descriptor.id,
            origin: descriptor.origin.clone(),
            protocol: descriptor.protocol.clone(),
            extensions: descriptor.extensions.clone(),
            peer_addr,
            state: AtomicU8::new(SessionState::Handshaking as u8),
            writer: Mutex::new(Some(Box::pin(writer))),
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            write_failed: AtomicBool::new(false),
            finalized: AtomicBool::new(false),
            signal: Notify::new(),
        }
    }

    /// Bound every outbound write, including the wait for the write gate.
    pub fn with_write_timeout(mut self, write_timeout: Duration) -> Self {
        self.write_timeout = write_timeout;
        self
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn origin(&self) -> Option<&str> {
        self.origin.as_deref()
    }

    /// Negotiated subprotocol, if any.
    pub fn protocol(&self) -> Option<&str> {
        self.protocol.as_deref()
    }

    /// Negotiated extensions in client-offered order.
    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    pub fn state(&self) -> SessionState {
        SessionState::from(self.state.load(Ordering::SeqCst))
    }

    pub fn is_open(&self) -> bool {
        self.state() == SessionState::Open
    }

    /// Send one frame. Only allowed while `Open`.
    pub async fn send(&self, frame: &Frame) -> Result<(), SendError> {
        if !self.is_open() {
            return Err(SendError::Closed);
        }
        let bytes = frame.encode()?;
        self.send_encoded(&bytes).await
    }

    pub async fn send_text(&self, text: impl Into<String>) -> Result<(), SendError> {
        self.send(&Frame::text(text.into())).await
    }

    pub async fn send_binary(&self, data: impl Into<Bytes>) -> Result<(), SendError> {
        self.send(&Frame::binary(data)).await
    }

    /// Send a Ping. Payloads over 125 bytes are rejected.
    pub async fn ping(&self, payload: impl Into<Bytes>) -> Result<(), SendError> {
        self.send(&Frame::ping(payload)).await
    }

    /// Start a server-initiated close handshake.
    ///
    /// Moves `Open → Closing` and sends Close. The session loop then waits
    /// for the peer's echo, bounded by the close timeout. The reason is cut
    /// to fit a control frame.
    pub async fn close(&self, code: CloseCode, reason: &str) -> Result<(), SendError> {
        if !self.begin_closing() {
            return Err(SendError::Closed);
        }
        let frame = Frame::close(Some(code.as_u16()), truncate_reason(reason));
        let result = self.write_frame(&frame).await;
        self.signal.notify_one();
        result
    }

    /// Write pre-encoded frame bytes; used by broadcast to encode once.
    pub(crate) async fn send_encoded(&self, bytes: &[u8]) -> Result<(), SendError> {
        if !self.is_open() {
            return Err(SendError::Closed);
        }
        self.write_raw(bytes).await
    }

    /// Write bytes regardless of state (handshake response, control replies).
    ///
    /// A write that fails or outlives the write timeout poisons the session:
    /// the stream may hold a partial frame, so the loop ends abruptly.
    pub(crate) async fn write_raw(&self, bytes: &[u8]) -> Result<(), SendError> {
        if self.write_failed() {
            return Err(SendError::Closed);
        }

        let write = self.write_locked(bytes);
        let result = match tokio::time::timeout(self.write_timeout, write).await {
            Ok(result) => result,
            Err(_) => Err(SendError::Io(io::Error::new(
                io::ErrorKind::TimedOut,
                "outbound write timed out",
            ))),
        };

        if let Err(SendError::Io(_)) = &result {
            self.write_failed.store(true, Ordering::SeqCst);
            self.signal.notify_one();
        }
        result
    }

    async fn write_locked(&self, bytes: &[u8]) -> Result<(), SendError> {
        let mut writer = self.writer.lock().await;
        let Some(stream) = writer.as_mut() else {
            return Err(SendError::Closed);
        };
        stream.write_all(bytes).await?;
        stream.flush().await?;
        Ok(())
    }

    async fn write_frame(&self, frame: &Frame) -> Result<(), SendError> {
        let bytes = frame.encode()?;
        self.write_raw(&bytes).await
    }

    pub(crate) fn mark_open(&self) {
        self.state.store(SessionState::Open as u8, Ordering::SeqCst);
    }

    /// `Open → Closing`. Returns false if the session was not open.
    fn begin_closing(&self) -> bool {
        self.state
            .compare_exchange(
                SessionState::Open as u8,
                SessionState::Closing as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    fn write_failed(&self) -> bool {
        self.write_failed.load(Ordering::SeqCst)
    }

    /// Move to `Closed` and shut the socket. Only the first call does work.
    pub(crate) async fn finalize(&self) -> bool {
        if self.finalized.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.state.store(SessionState::Closed as u8, Ordering::SeqCst);

        let shutdown = async {
            let writer = self.writer.lock().await.take();
            match writer {
                Some(mut stream) => stream.shutdown().await,
                None => Ok(()),
            }
        };
        match tokio::time::timeout(self.write_timeout, shutdown).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::trace!(connection_id = %self.id, error = %e, "Socket shutdown failed")
            }
            Err(_) => {
                tracing::debug!(connection_id = %self.id, "Writer busy, abandoning socket shutdown")
            }
        }
        true
    }
}

impl fmt::Debug for ConnectionSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSession")
            .field("id", &self.id)
            .field("origin", &self.origin)
            .field("protocol", &self.protocol)
            .field("extensions", &self.extensions)
            .field("peer_addr", &self.peer_addr)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

fn truncate_reason(reason: &str) -> &str {
    let max = MAX_CONTROL_PAYLOAD - 2;
    if reason.len() <= max {
        return reason;
    }
    let mut end = max;
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    &reason[..end]
}

/// How a session ended.
#[derive(Debug)]
pub enum SessionEnd {
    /// Close handshake completed (either side initiated).
    Clean,
    /// We sent Close and the peer never echoed it.
    CloseTimeout,
    /// The peer went away without a Close frame.
    Eof,
    Protocol(ProtocolError),
    Io(io::Error),
}

impl SessionEnd {
    /// Metric label for this outcome.
    pub fn label(&self) -> &'static str {
        match self {
            SessionEnd::Clean => "clean",
            SessionEnd::CloseTimeout => "close_timeout",
            SessionEnd::Eof => "eof",
            SessionEnd::Protocol(_) => "protocol_error",
            SessionEnd::Io(_) => "io_error",
        }
    }

    pub fn is_clean(&self) -> bool {
        matches!(self, SessionEnd::Clean)
    }
}

impl From<SendError> for SessionEnd {
    fn from(err: SendError) -> Self {
        match err {
            SendError::Io(e) => SessionEnd::Io(e),
            SendError::InvalidFrame(e) => SessionEnd::Protocol(e),
            SendError::Closed => SessionEnd::Io(io::Error::new(
                io::ErrorKind::NotConnected,
                "session writer already closed",
            )),
        }
    }
}

/// Tunables for the session loop.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub close_timeout: Duration,
    pub write_timeout: Duration,
    pub max_message_size: usize,
    pub require_masked: bool,
}

impl SessionSettings {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            close_timeout: Duration::from_millis(config.timeouts.close_ms),
            write_timeout: Duration::from_millis(config.timeouts.write_ms),
            max_message_size: config.websocket.max_message_size,
            require_masked: config.websocket.require_masked_frames,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_config(&ServerConfig::default())
    }
}

enum Flow {
    Continue,
    Done,
}

/// The task that owns a session and reads from its socket.
pub struct SessionLoop<R> {
    frames: FramedRead<R, FrameCodec>,
    session: Arc<ConnectionSession>,
    registry: Arc<ConnectionRegistry>,
    handler: Arc<dyn MessageHandler>,
    settings: SessionSettings,
    reassembler: Reassembler,
    shutdown: Option<broadcast::Receiver<()>>,
    close_deadline: Option<Instant>,
}

impl<R> SessionLoop<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(
        frames: FramedRead<R, FrameCodec>,
        session: Arc<ConnectionSession>,
        registry: Arc<ConnectionRegistry>,
        handler: Arc<dyn MessageHandler>,
        settings: SessionSettings,
    ) -> Self {
        let reassembler = Reassembler::new(settings.max_message_size);
        Self {
            frames,
            session,
            registry,
            handler,
            settings,
            reassembler,
            shutdown: None,
            close_deadline: None,
        }
    }

    /// Close with Going Away when `shutdown` fires.
    pub fn with_shutdown(mut self, shutdown: broadcast::Receiver<()>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Run until the session reaches `Closed`.
    pub async fn run(mut self) -> SessionEnd {
        let end = self.drive().await;
        self.finish(&end).await;
        end
    }

    async fn drive(&mut self) -> SessionEnd {
        loop {
            let deadline = self.close_deadline;
            tokio::select! {
                next = self.frames.next() => match next {
                    Some(Ok(frame)) => match self.dispatch(frame).await {
                        Ok(Flow::Continue) => {}
                        Ok(Flow::Done) => return SessionEnd::Clean,
                        Err(end) => return end,
                    },
                    Some(Err(WsError::Protocol(e))) => return SessionEnd::Protocol(e),
                    Some(Err(WsError::Io(e))) => return SessionEnd::Io(e),
                    None => return SessionEnd::Eof,
                },
                _ = self.session.signal.notified() => {
                    if self.session.write_failed() {
                        return SessionEnd::Io(io::Error::new(
                            io::ErrorKind::BrokenPipe,
                            "outbound write failed",
                        ));
                    }
                    self.arm_close_deadline();
                }
                _ = sleep_until(deadline) => return SessionEnd::CloseTimeout,
                _ = recv_shutdown(&mut self.shutdown) => {
                    self.shutdown = None;
                    // The deadline covers sending Close as well as the echo.
                    let deadline = *self
                        .close_deadline
                        .get_or_insert_with(|| Instant::now() + self.settings.close_timeout);
                    let close = self.session.close(CloseCode::GoingAway, "server shutting down");
                    match tokio::time::timeout_at(deadline, close).await {
                        Ok(Ok(())) | Ok(Err(SendError::Closed)) => {}
                        Ok(Err(e)) => return e.into(),
                        Err(_) => return SessionEnd::CloseTimeout,
                    }
                }
            }
        }
    }

    fn arm_close_deadline(&mut self) {
        if self.close_deadline.is_none() && self.session.state() == SessionState::Closing {
            self.close_deadline = Some(Instant::now() + self.settings.close_timeout);
        }
    }

    async fn dispatch(&mut self, frame: Frame) -> Result<Flow, SessionEnd> {
        metrics::record_frame(frame.opcode.name());

        if self.settings.require_masked && !frame.is_masked() {
            return Err(SessionEnd::Protocol(ProtocolError::UnmaskedClientFrame));
        }

        match frame.opcode {
            Opcode::Ping => {
                if self.session.is_open() {
                    self.session.write_frame(&Frame::pong(frame.payload)).await?;
                }
                Ok(Flow::Continue)
            }
            Opcode::Pong => {
                if self.session.is_open() {
                    self.handler
                        .on_pong(&self.session, &self.registry, frame.payload)
                        .await;
                }
                Ok(Flow::Continue)
            }
            Opcode::Close => {
                let payload = ClosePayload::parse(&frame.payload).map_err(SessionEnd::Protocol)?;
                if self.session.begin_closing() {
                    tracing::debug!(
                        connection_id = %self.session.id(),
                        code = ?payload.code,
                        reason = %payload.reason,
                        "Peer initiated close"
                    );
                    self.session
                        .write_frame(&Frame::close(payload.code, &payload.reason))
                        .await?;
                }
                Ok(Flow::Done)
            }
            Opcode::Text | Opcode::Binary | Opcode::Continuation => {
                if !self.session.is_open() {
                    return Ok(Flow::Continue);
                }
                if let Some(message) = self.reassembler.push(frame).map_err(SessionEnd::Protocol)? {
                    metrics::record_message(message.opcode().name());
                    self.handler
                        .on_message(&self.session, &self.registry, message)
                        .await;
                }
                Ok(Flow::Continue)
            }
            Opcode::Reserved(op) => Err(SessionEnd::Protocol(ProtocolError::InvalidOpcode(op))),
        }
    }

    async fn finish(&mut self, end: &SessionEnd) {
        let id = self.session.id();
        self.registry.remove(&id);
        if !self.session.finalize().await {
            return;
        }
        metrics::record_session_closed(end.label());

        match end {
            SessionEnd::Clean => tracing::debug!(connection_id = %id, "Session closed"),
            SessionEnd::CloseTimeout => {
                tracing::debug!(connection_id = %id, "Peer did not answer Close, dropping")
            }
            SessionEnd::Eof => tracing::debug!(connection_id = %id, "Peer disconnected"),
            SessionEnd::Protocol(e) => {
                tracing::debug!(connection_id = %id, error = %e, "Session aborted on protocol error")
            }
            SessionEnd::Io(e) => {
                tracing::debug!(connection_id = %id, error = %e, "Session aborted on I/O error")
            }
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Resolves on the signal or when the sender is gone.
async fn recv_shutdown(shutdown: &mut Option<broadcast::Receiver<()>>) {
    match shutdown {
        Some(rx) => {
            let _ = rx.recv().await;
        }
        None => std::future::pending().await,
    }
}
