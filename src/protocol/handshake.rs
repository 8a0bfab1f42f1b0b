//! Server-side opening handshake (RFC 6455 Section 4.2).
//!
//! # Client Request
//!
//! ```http
//! GET /chat HTTP/1.1
//! Upgrade: websocket
//! Connection: Upgrade
//! Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==
//! Sec-WebSocket-Version: 13
//! ```
//!
//! # Server Response
//!
//! ```http
//! HTTP/1.1 101 Switching Protocols
//! upgrade: websocket
//! Connection: upgrade
//! Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=
//! ```

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use sha1::{Digest, Sha1};
use thiserror::Error;

use crate::config::WebSocketConfig;
use crate::http::UpgradeRequest;
use crate::net::connection::ConnectionId;

/// GUID appended to the client key before hashing.
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// The only protocol version this server speaks.
pub const WS_VERSION: &str = "13";

/// Value that disables the origin check.
pub const ANY_ORIGIN: &str = "*";

/// `base64(SHA1(key + GUID))`.
pub fn compute_accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Why an upgrade request was refused. Every variant maps to `400 Bad Request`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandshakeError {
    #[error("method must be GET, got {0}")]
    Method(String),

    #[error("unexpected request target {0:?}")]
    Path(String),

    #[error("missing or wrong 'upgrade' header")]
    Upgrade,

    #[error("missing or wrong 'connection' header")]
    Connection,

    #[error("missing or wrong 'sec-websocket-key' header")]
    Key,

    #[error("unsupported 'sec-websocket-version': {0:?}")]
    Version(Option<String>),

    #[error("origin not allowed: {0:?}")]
    Origin(Option<String>),
}

impl HandshakeError {
    /// Stable label for logs and metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            HandshakeError::Method(_) => "method",
            HandshakeError::Path(_) => "path",
            HandshakeError::Upgrade => "upgrade",
            HandshakeError::Connection => "connection",
            HandshakeError::Key => "key",
            HandshakeError::Version(_) => "version",
            HandshakeError::Origin(_) => "origin",
        }
    }
}

/// What the server accepts during negotiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakePolicy {
    /// Request target that must match exactly.
    pub path: String,
    /// `"*"` or one exact origin.
    pub allowed_origin: String,
    pub allowed_protocols: Vec<String>,
    pub allowed_extensions: Vec<String>,
}

impl HandshakePolicy {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            allowed_origin: ANY_ORIGIN.to_string(),
            allowed_protocols: Vec::new(),
            allowed_extensions: Vec::new(),
        }
    }

    pub fn from_config(config: &WebSocketConfig) -> Self {
        Self {
            path: config.path.clone(),
            allowed_origin: config.allowed_origin.clone(),
            allowed_protocols: config.allowed_protocols.clone(),
            allowed_extensions: config.allowed_extensions.clone(),
        }
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.allowed_origin = origin.into();
        self
    }

    pub fn with_protocols<I, S>(mut self, protocols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_protocols = protocols.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_extensions = extensions.into_iter().map(Into::into).collect();
        self
    }

    fn origin_allowed(&self, origin: Option<&str>) -> bool {
        self.allowed_origin == ANY_ORIGIN || origin == Some(self.allowed_origin.as_str())
    }
}

impl Default for HandshakePolicy {
    fn default() -> Self {
        Self::new("/")
    }
}

/// Outcome of a successful negotiation; everything a session needs to start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescriptor {
    pub id: ConnectionId,
    pub origin: Option<String>,
    pub protocol: Option<String>,
    pub extensions: Vec<String>,
    pub accept_key: String,
}

/// Validate an upgrade request and negotiate protocol and extensions.
///
/// Checks run in a fixed order and the first failure wins. Protocol and
/// extension selection never fail the handshake.
pub fn negotiate(request: &UpgradeRequest, policy: &HandshakePolicy) -> Result<SessionDescriptor, HandshakeError> {
    if request.method != "GET" {
        return Err(HandshakeError::Method(request.method.clone()));
    }
    if request.target != policy.path {
        return Err(HandshakeError::Path(request.target.clone()));
    }

    let upgrade = request.header("upgrade").unwrap_or_default();
    if !upgrade.eq_ignore_ascii_case("websocket") {
        return Err(HandshakeError::Upgrade);
    }

    let has_upgrade_token = request
        .headers
        .get_list("connection")
        .iter()
        .any(|token| token.eq_ignore_ascii_case("upgrade"));
    if !has_upgrade_token {
        return Err(HandshakeError::Connection);
    }

    let key = request.header("sec-websocket-key").unwrap_or_default().trim();
    match BASE64.decode(key) {
        Ok(raw) if raw.len() == 16 => {}
        _ => return Err(HandshakeError::Key),
    }

    let version = request.header("sec-websocket-version");
    if version.map(str::trim) != Some(WS_VERSION) {
        return Err(HandshakeError::Version(version.map(str::to_owned)));
    }

    let origin = request.header("origin").map(str::to_owned);
    if !policy.origin_allowed(origin.as_deref()) {
        return Err(HandshakeError::Origin(origin));
    }

    let protocol = request
        .headers
        .get_list("sec-websocket-protocol")
        .into_iter()
        .find(|offered| policy.allowed_protocols.contains(offered));

    let extensions = request
        .headers
        .get_list("sec-websocket-extensions")
        .into_iter()
        .filter(|offered| policy.allowed_extensions.contains(offered))
        .collect();

    Ok(SessionDescriptor {
        id: ConnectionId::new(),
        origin,
        protocol,
        extensions,
        accept_key: compute_accept_key(key),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";

    fn request(extra: &[(&str, &str)]) -> UpgradeRequest {
        request_with("GET", "/chat", extra)
    }

    fn request_with(method: &str, target: &str, extra: &[(&str, &str)]) -> UpgradeRequest {
        let mut head = format!(
            "{method} {target} HTTP/1.1\r\nHost: localhost\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: {KEY}\r\n"
        );
        let overridden: Vec<&str> = extra.iter().map(|(k, _)| *k).collect();
        if !overridden.contains(&"Sec-WebSocket-Version") {
            head.push_str("Sec-WebSocket-Version: 13\r\n");
        }
        for (k, v) in extra {
            head.push_str(&format!("{k}: {v}\r\n"));
        }
        head.push_str("\r\n");
        UpgradeRequest::parse(&head).unwrap()
    }

    fn policy() -> HandshakePolicy {
        HandshakePolicy::new("/chat")
    }

    #[test]
    fn rfc_accept_key() {
        assert_eq!(compute_accept_key(KEY), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn accepts_minimal_request() {
        let descriptor = negotiate(&request(&[]), &policy()).unwrap();
        assert_eq!(descriptor.accept_key, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
        assert_eq!(descriptor.protocol, None);
        assert!(descriptor.extensions.is_empty());
        assert_eq!(descriptor.origin, None);
    }

    #[test]
    fn each_descriptor_gets_a_fresh_identity() {
        let a = negotiate(&request(&[]), &policy()).unwrap();
        let b = negotiate(&request(&[]), &policy()).unwrap();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn rejects_wrong_method_or_path() {
        assert_eq!(
            negotiate(&request_with("POST", "/chat", &[]), &policy()),
            Err(HandshakeError::Method("POST".into()))
        );
        assert_eq!(
            negotiate(&request_with("GET", "/chat?x=1", &[]), &policy()),
            Err(HandshakeError::Path("/chat?x=1".into()))
        );
    }

    #[test]
    fn rejects_bad_upgrade_and_connection() {
        let head = format!(
            "GET /chat HTTP/1.1\r\nUpgrade: h2c\r\nConnection: upgrade\r\nSec-WebSocket-Key: {KEY}\r\nSec-WebSocket-Version: 13\r\n\r\n"
        );
        let req = UpgradeRequest::parse(&head).unwrap();
        assert_eq!(negotiate(&req, &policy()), Err(HandshakeError::Upgrade));

        let head = format!(
            "GET /chat HTTP/1.1\r\nUpgrade: WebSocket\r\nConnection: keep-alive\r\nSec-WebSocket-Key: {KEY}\r\nSec-WebSocket-Version: 13\r\n\r\n"
        );
        let req = UpgradeRequest::parse(&head).unwrap();
        assert_eq!(negotiate(&req, &policy()), Err(HandshakeError::Connection));
    }

    #[test]
    fn connection_token_list_is_accepted() {
        let head = format!(
            "GET /chat HTTP/1.1\r\nUpgrade: websocket\r\nConnection: keep-alive, Upgrade\r\nSec-WebSocket-Key: {KEY}\r\nSec-WebSocket-Version: 13\r\n\r\n"
        );
        let req = UpgradeRequest::parse(&head).unwrap();
        assert!(negotiate(&req, &policy()).is_ok());
    }

    #[test]
    fn rejects_key_that_is_not_16_bytes() {
        for key in ["", "not base64!!", "c2hvcnQ="] {
            let head = format!(
                "GET /chat HTTP/1.1\r\nUpgrade: websocket\r\nConnection: upgrade\r\nSec-WebSocket-Key: {key}\r\nSec-WebSocket-Version: 13\r\n\r\n"
            );
            let req = UpgradeRequest::parse(&head).unwrap();
            assert_eq!(negotiate(&req, &policy()), Err(HandshakeError::Key), "key {key:?}");
        }
    }

    #[test]
    fn rejects_version_12() {
        let req = request(&[("Sec-WebSocket-Version", "12")]);
        assert_eq!(
            negotiate(&req, &policy()),
            Err(HandshakeError::Version(Some("12".into())))
        );
    }

    #[test]
    fn origin_allow_list() {
        let strict = policy().with_origin("https://app.example");

        let ok = request(&[("Origin", "https://app.example")]);
        let descriptor = negotiate(&ok, &strict).unwrap();
        assert_eq!(descriptor.origin.as_deref(), Some("https://app.example"));

        let wrong = request(&[("Origin", "https://evil.example")]);
        assert_eq!(
            negotiate(&wrong, &strict),
            Err(HandshakeError::Origin(Some("https://evil.example".into())))
        );

        assert_eq!(negotiate(&request(&[]), &strict), Err(HandshakeError::Origin(None)));

        let any = negotiate(&wrong, &policy()).unwrap();
        assert_eq!(any.origin.as_deref(), Some("https://evil.example"));
    }

    #[test]
    fn selects_first_offered_protocol_that_is_allowed() {
        let p = policy().with_protocols(["v2", "v1"]);
        let req = request(&[("Sec-WebSocket-Protocol", "v0, v1, v2")]);
        assert_eq!(negotiate(&req, &p).unwrap().protocol.as_deref(), Some("v1"));

        let none = request(&[("Sec-WebSocket-Protocol", "v9")]);
        assert_eq!(negotiate(&none, &p).unwrap().protocol, None);
    }

    #[test]
    fn keeps_all_allowed_extensions_in_offer_order() {
        let p = policy().with_extensions(["b", "a"]);
        let req = request(&[("Sec-WebSocket-Extensions", "a, c, b")]);
        assert_eq!(negotiate(&req, &p).unwrap().extensions, vec!["a", "b"]);
    }
}
