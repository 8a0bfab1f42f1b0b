//! End-to-end tests against a server on a real TCP socket.

use bytes::Bytes;
use futures_util::future::BoxFuture;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use ws_hub::protocol::{ClosePayload, Frame, Message, Opcode};
use ws_hub::ws::{BroadcastHandler, ConnectionRegistry, ConnectionSession, EchoHandler, MessageHandler};

mod common;
use common::{start_server, test_config, upgrade_request, RawClient};

/// Counts messages and echoes them back.
#[derive(Default)]
struct CountingEcho {
    messages: AtomicUsize,
    pongs: AtomicUsize,
}

impl MessageHandler for CountingEcho {
    fn on_message<'a>(
        &'a self,
        session: &'a Arc<ConnectionSession>,
        _registry: &'a ConnectionRegistry,
        message: Message,
    ) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            self.messages.fetch_add(1, Ordering::SeqCst);
            let _ = session.send(&message.into_frame()).await;
        })
    }

    fn on_pong<'a>(
        &'a self,
        _session: &'a Arc<ConnectionSession>,
        _registry: &'a ConnectionRegistry,
        _payload: Bytes,
    ) -> BoxFuture<'a, ()> {
        self.pongs.fetch_add(1, Ordering::SeqCst);
        Box::pin(async {})
    }
}

#[tokio::test]
async fn handshake_returns_accept_key() {
    let server = start_server(test_config(), Arc::new(EchoHandler)).await;
    let client = RawClient::connect(server.addr).await;

    assert_eq!(client.status_line(), "HTTP/1.1 101 Switching Protocols");
    assert_eq!(client.header("upgrade"), Some("websocket"));
    assert_eq!(
        client.header("Sec-WebSocket-Accept"),
        Some("s3pPLMBiTxaQ9kYGzzhZRbK+xOo=")
    );
    assert_eq!(client.header("Sec-WebSocket-Protocol"), None);
    server.wait_for_sessions(1).await;
    server.stop().await.unwrap();
}

#[tokio::test]
async fn negotiates_protocol_and_extensions() {
    let mut config = test_config();
    config.websocket.allowed_protocols = vec!["chat.v2".into(), "chat.v1".into()];
    config.websocket.allowed_extensions = vec!["x-a".into(), "x-b".into()];
    let server = start_server(config, Arc::new(EchoHandler)).await;

    let request = upgrade_request(
        "/",
        &[
            ("Sec-WebSocket-Protocol", "other, chat.v1, chat.v2"),
            ("Sec-WebSocket-Extensions", "x-b, x-unknown, x-a"),
        ],
    );
    let client = RawClient::connect_with(server.addr, &request).await;

    assert_eq!(client.header("Sec-WebSocket-Protocol"), Some("chat.v1"));
    assert_eq!(client.header("Sec-WebSocket-Extensions"), Some("x-b, x-a"));
    server.stop().await.unwrap();
}

#[tokio::test]
async fn version_12_is_rejected_without_registration() {
    let server = start_server(test_config(), Arc::new(EchoHandler)).await;
    let request = upgrade_request("/", &[("Sec-WebSocket-Version", "12")]);
    let client = RawClient::connect_with(server.addr, &request).await;

    assert_eq!(client.status_line(), "HTTP/1.1 400 Bad Request");
    assert!(client.read_to_end().await.is_empty());
    assert!(server.registry.is_empty());
    server.stop().await.unwrap();
}

#[tokio::test]
async fn origin_policy_is_enforced() {
    let mut config = test_config();
    config.websocket.allowed_origin = "https://app.example".into();
    let server = start_server(config, Arc::new(EchoHandler)).await;

    let missing = RawClient::connect_with(server.addr, &upgrade_request("/", &[])).await;
    assert_eq!(missing.status_line(), "HTTP/1.1 400 Bad Request");

    let wrong = upgrade_request("/", &[("Origin", "https://evil.example")]);
    let wrong = RawClient::connect_with(server.addr, &wrong).await;
    assert_eq!(wrong.status_line(), "HTTP/1.1 400 Bad Request");

    let right = upgrade_request("/", &[("Origin", "https://app.example")]);
    let right = RawClient::connect_with(server.addr, &right).await;
    assert_eq!(right.status_line(), "HTTP/1.1 101 Switching Protocols");
    server.stop().await.unwrap();
}

#[tokio::test]
async fn wrong_path_is_rejected() {
    let mut config = test_config();
    config.websocket.path = "/chat".into();
    let server = start_server(config, Arc::new(EchoHandler)).await;

    let client = RawClient::connect_with(server.addr, &upgrade_request("/other", &[])).await;
    assert_eq!(client.status_line(), "HTTP/1.1 400 Bad Request");
    server.stop().await.unwrap();
}

#[tokio::test]
async fn silent_client_times_out_during_handshake() {
    let mut config = test_config();
    config.timeouts.handshake_ms = 100;
    let server = start_server(config, Arc::new(EchoHandler)).await;

    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    stream.write_all(b"GET / HTTP/1.1\r\n").await.unwrap();

    let mut response = String::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_string(&mut response))
        .await
        .unwrap()
        .unwrap();
    assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));
    assert!(server.registry.is_empty());
    server.stop().await.unwrap();
}

#[tokio::test]
async fn ping_gets_pong_without_handler() {
    let handler = Arc::new(CountingEcho::default());
    let server = start_server(test_config(), handler.clone()).await;
    let mut client = RawClient::connect(server.addr).await;

    client.send(Frame::ping(&b"abc"[..])).await;
    let pong = client.recv().await;
    assert_eq!(pong.opcode, Opcode::Pong);
    assert_eq!(&pong.payload[..], b"abc");
    assert_eq!(handler.messages.load(Ordering::SeqCst), 0);

    client.send(Frame::pong(&b"unsolicited"[..])).await;
    client.send(Frame::text("sync")).await;
    assert_eq!(client.recv().await.opcode, Opcode::Text);
    assert_eq!(handler.pongs.load(Ordering::SeqCst), 1);
    server.stop().await.unwrap();
}

#[tokio::test]
async fn client_close_is_echoed_and_deregistered() {
    let server = start_server(test_config(), Arc::new(EchoHandler)).await;
    let mut client = RawClient::connect(server.addr).await;
    server.wait_for_sessions(1).await;

    client.send(Frame::close(Some(1000), "")).await;
    let echo = client.recv().await;
    assert_eq!(echo.opcode, Opcode::Close);
    assert_eq!(ClosePayload::parse(&echo.payload).unwrap().code, Some(1000));

    assert!(client.closed().await);
    server.wait_for_sessions(0).await;
    server.stop().await.unwrap();
}

#[tokio::test]
async fn fragmented_text_is_delivered_once() {
    let handler = Arc::new(CountingEcho::default());
    let server = start_server(test_config(), handler.clone()).await;
    let mut client = RawClient::connect(server.addr).await;

    client.send(Frame::new(false, Opcode::Text, &b"He"[..])).await;
    client.send(Frame::continuation(true, &b"llo"[..])).await;

    let echo = client.recv().await;
    assert_eq!(echo.opcode, Opcode::Text);
    assert!(echo.fin);
    assert_eq!(&echo.payload[..], b"Hello");
    assert_eq!(handler.messages.load(Ordering::SeqCst), 1);
    server.stop().await.unwrap();
}

#[tokio::test]
async fn large_binary_spans_many_reads() {
    let server = start_server(test_config(), Arc::new(EchoHandler)).await;
    let mut client = RawClient::connect(server.addr).await;

    let payload: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
    let bytes = Frame::binary(payload.clone()).masked().encode().unwrap();
    for chunk in bytes.chunks(1000) {
        client.send_raw(chunk).await;
    }

    let echo = client.recv().await;
    assert_eq!(echo.opcode, Opcode::Binary);
    assert_eq!(&echo.payload[..], &payload[..]);
    server.stop().await.unwrap();
}

#[tokio::test]
async fn reserved_opcode_aborts_without_close_frame() {
    let server = start_server(test_config(), Arc::new(EchoHandler)).await;
    let mut client = RawClient::connect(server.addr).await;
    server.wait_for_sessions(1).await;

    // FIN + opcode 0x3, masked, empty payload.
    client.send_raw(&[0x83, 0x80, 1, 2, 3, 4]).await;
    assert!(client.closed().await);
    server.wait_for_sessions(0).await;
    server.stop().await.unwrap();
}

#[tokio::test]
async fn oversized_message_is_a_protocol_error() {
    let mut config = test_config();
    config.websocket.max_message_size = 8;
    let server = start_server(config, Arc::new(EchoHandler)).await;
    let mut client = RawClient::connect(server.addr).await;

    client.send(Frame::new(false, Opcode::Binary, vec![0u8; 6])).await;
    client.send(Frame::continuation(true, vec![0u8; 6])).await;
    assert!(client.closed().await);
    server.stop().await.unwrap();
}

#[tokio::test]
async fn broadcast_reaches_other_members() {
    let server = start_server(test_config(), Arc::new(BroadcastHandler)).await;
    let mut sender = RawClient::connect(server.addr).await;
    let mut first = RawClient::connect(server.addr).await;
    let mut second = RawClient::connect(server.addr).await;
    server.wait_for_sessions(3).await;

    sender.send(Frame::text("news")).await;
    for client in [&mut first, &mut second] {
        let frame = client.recv().await;
        assert_eq!(frame.opcode, Opcode::Text);
        assert_eq!(&frame.payload[..], b"news");
    }

    // Sender gets nothing back; a ping round-trip proves the queue is empty.
    sender.send(Frame::ping(&b"p"[..])).await;
    assert_eq!(sender.recv().await.opcode, Opcode::Pong);
    server.stop().await.unwrap();
}

#[tokio::test]
async fn broadcast_survives_vanished_member() {
    let server = start_server(test_config(), Arc::new(BroadcastHandler)).await;
    let mut sender = RawClient::connect(server.addr).await;
    let mut survivor = RawClient::connect(server.addr).await;
    let gone = RawClient::connect(server.addr).await;
    server.wait_for_sessions(3).await;

    drop(gone);
    sender.send(Frame::text("still here")).await;
    let frame = survivor.recv().await;
    assert_eq!(&frame.payload[..], b"still here");
    server.wait_for_sessions(2).await;
    server.stop().await.unwrap();
}

#[tokio::test]
async fn shutdown_sends_going_away_and_drains() {
    let server = start_server(test_config(), Arc::new(EchoHandler)).await;
    let mut client = RawClient::connect(server.addr).await;
    server.wait_for_sessions(1).await;

    server.shutdown.trigger();
    let close = client.recv().await;
    assert_eq!(close.opcode, Opcode::Close);
    assert_eq!(ClosePayload::parse(&close.payload).unwrap().code, Some(1001));
    client.send(Frame::close(Some(1001), "")).await;

    let registry = Arc::clone(&server.registry);
    server.task.await.unwrap().unwrap();
    assert!(registry.is_empty());
}
