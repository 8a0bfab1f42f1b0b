//! Shared utilities for integration tests.

#![allow(dead_code)]

use futures_util::StreamExt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;

use ws_hub::config::ServerConfig;
use ws_hub::lifecycle::Shutdown;
use ws_hub::net::listener::Listener;
use ws_hub::protocol::{Frame, FrameCodec};
use ws_hub::ws::{ConnectionRegistry, MessageHandler, ServerError, WebSocketServer};

pub const SAMPLE_KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";

/// A server running on an ephemeral localhost port.
pub struct TestServer {
    pub addr: SocketAddr,
    pub registry: Arc<ConnectionRegistry>,
    pub shutdown: Shutdown,
    pub task: JoinHandle<Result<(), ServerError>>,
}

impl TestServer {
    pub async fn stop(self) -> Result<(), ServerError> {
        self.shutdown.trigger();
        self.task.await.unwrap()
    }

    /// Poll until the registry holds `n` sessions.
    pub async fn wait_for_sessions(&self, n: usize) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while self.registry.len() != n {
            assert!(
                tokio::time::Instant::now() < deadline,
                "expected {n} sessions, have {}",
                self.registry.len()
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

/// Config suitable for tests: localhost bind, short deadlines.
pub fn test_config() -> ServerConfig {
    let mut config = ServerConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.timeouts.handshake_ms = 1_000;
    config.timeouts.close_ms = 300;
    config.timeouts.drain_ms = 2_000;
    config.timeouts.write_ms = 1_000;
    config
}

pub async fn start_server(config: ServerConfig, handler: Arc<dyn MessageHandler>) -> TestServer {
    let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let listener = Listener::from_tcp(tcp, config.listener.max_connections).unwrap();
    let addr = listener.local_addr().unwrap();

    let server = WebSocketServer::new(config, handler);
    let registry = server.registry();
    let shutdown = Shutdown::new();
    let task = tokio::spawn(server.run(listener, shutdown.subscribe()));

    TestServer {
        addr,
        registry,
        shutdown,
        task,
    }
}

pub fn upgrade_request(path: &str, extra_headers: &[(&str, &str)]) -> String {
    let mut request = format!(
        "GET {path} HTTP/1.1\r\n\
         Host: localhost\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {SAMPLE_KEY}\r\n"
    );
    let overrides_version = extra_headers
        .iter()
        .any(|(name, _)| name.eq_ignore_ascii_case("Sec-WebSocket-Version"));
    if !overrides_version {
        request.push_str("Sec-WebSocket-Version: 13\r\n");
    }
    for (name, value) in extra_headers {
        request.push_str(&format!("{name}: {value}\r\n"));
    }
    request.push_str("\r\n");
    request
}

/// Minimal client that speaks raw frames through the crate's own codec.
pub struct RawClient {
    pub response_head: String,
    frames: FramedRead<BufReader<OwnedReadHalf>, FrameCodec>,
    writer: OwnedWriteHalf,
}

impl RawClient {
    /// Connect and perform the opening handshake with `request`.
    pub async fn connect_with(addr: SocketAddr, request: &str) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read_half, mut writer) = stream.into_split();
        writer.write_all(request.as_bytes()).await.unwrap();

        let mut reader = BufReader::new(read_half);
        let mut response_head = String::new();
        loop {
            let mut line = String::new();
            let n = reader.read_line(&mut line).await.unwrap();
            response_head.push_str(&line);
            if n == 0 || line == "\r\n" {
                break;
            }
        }

        Self {
            response_head,
            frames: FramedRead::new(reader, FrameCodec::new()),
            writer,
        }
    }

    pub async fn connect(addr: SocketAddr) -> Self {
        Self::connect_with(addr, &upgrade_request("/", &[])).await
    }

    pub fn status_line(&self) -> &str {
        self.response_head.lines().next().unwrap_or_default()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.response_head.lines().skip(1).find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.trim()
                .eq_ignore_ascii_case(name)
                .then(|| value.trim())
        })
    }

    /// Send a frame, masked as a client must.
    pub async fn send(&mut self, frame: Frame) {
        let bytes = frame.masked().encode().unwrap();
        self.writer.write_all(&bytes).await.unwrap();
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.unwrap();
    }

    /// Next frame from the server; panics on timeout.
    pub async fn recv(&mut self) -> Frame {
        tokio::time::timeout(Duration::from_secs(5), self.frames.next())
            .await
            .expect("timed out waiting for frame")
            .expect("connection closed")
            .expect("decode error")
    }

    /// True once the server has closed the socket.
    pub async fn closed(&mut self) -> bool {
        matches!(
            tokio::time::timeout(Duration::from_secs(5), self.frames.next()).await,
            Ok(None) | Ok(Some(Err(_)))
        )
    }

    /// Read whatever the server sends until it closes.
    pub async fn read_to_end(self) -> Vec<u8> {
        let mut rest = self.frames.into_inner();
        let mut buf = Vec::new();
        let _ = rest.read_to_end(&mut buf).await;
        buf
    }
}
