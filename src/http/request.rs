//! Upgrade request reading.
//!
//! # Responsibilities
//! - Read the request line and headers from a buffered socket reader
//! - Enforce a size limit on the request head before anything is parsed
//! - Provide case-insensitive header lookup
//!
//! # Design Decisions
//! - The head is read line by line from an `AsyncBufRead`; bytes after the
//!   blank line stay in the reader's buffer for the frame decoder
//! - Repeated headers are kept in arrival order so list headers can be joined
//! - No request body is ever read: an upgrade request has none

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

/// Default limit on the size of the request head (8 KiB).
pub const DEFAULT_MAX_HEAD_BYTES: usize = 8 * 1024;

/// Errors while reading or parsing the request head.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("I/O error reading request: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection closed before the request head was complete")]
    Incomplete,

    #[error("request head exceeds {limit} bytes")]
    TooLarge { limit: usize },

    #[error("malformed request line: {0:?}")]
    RequestLine(String),

    #[error("malformed header line: {0:?}")]
    HeaderLine(String),

    #[error("request head is not valid UTF-8")]
    Encoding,
}

/// Ordered header collection with case-insensitive lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// First value for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Every value for `name`, in arrival order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Comma-separated list header, joined across repeated lines.
    ///
    /// Empty items are dropped and each item is trimmed.
    pub fn get_list(&self, name: &str) -> Vec<String> {
        self.get_all(name)
            .flat_map(|v| v.split(','))
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(str::to_owned)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A parsed HTTP/1.1 request head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeRequest {
    pub method: String,
    pub target: String,
    pub version: String,
    pub headers: Headers,
}

impl UpgradeRequest {
    /// Parse a complete request head (request line + headers, CRLF separated).
    pub fn parse(head: &str) -> Result<Self, RequestError> {
        let mut lines = head.split('\n').map(|l| l.strip_suffix('\r').unwrap_or(l));

        let request_line = lines
            .next()
            .filter(|l| !l.is_empty())
            .ok_or_else(|| RequestError::RequestLine(String::new()))?;
        let mut parts = request_line.split_whitespace();
        let (method, target, version) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(m), Some(t), Some(v), None) if v.starts_with("HTTP/") => (m, t, v),
            _ => return Err(RequestError::RequestLine(request_line.to_owned())),
        };

        let mut headers = Headers::new();
        for line in lines {
            if line.is_empty() {
                break;
            }
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| RequestError::HeaderLine(line.to_owned()))?;
            let name = name.trim();
            if name.is_empty() || name.contains(char::is_whitespace) {
                return Err(RequestError::HeaderLine(line.to_owned()));
            }
            headers.append(name, value.trim());
        }

        Ok(Self {
            method: method.to_owned(),
            target: target.to_owned(),
            version: version.to_owned(),
            headers,
        })
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }
}

/// Read one request head from `reader`, consuming exactly through the blank line.
pub async fn read_request<R>(reader: &mut R, max_head_bytes: usize) -> Result<UpgradeRequest, RequestError>
where
    R: AsyncBufRead + Unpin,
{
    let mut head = Vec::with_capacity(512);
    loop {
        let remaining = max_head_bytes.saturating_sub(head.len());
        if remaining == 0 {
            return Err(RequestError::TooLarge { limit: max_head_bytes });
        }

        let line_start = head.len();
        let read = (&mut *reader)
            .take(remaining as u64)
            .read_until(b'\n', &mut head)
            .await?;
        if read == 0 {
            return Err(RequestError::Incomplete);
        }
        if head.last() != Some(&b'\n') {
            if head.len() >= max_head_bytes {
                return Err(RequestError::TooLarge { limit: max_head_bytes });
            }
            return Err(RequestError::Incomplete);
        }

        let line = &head[line_start..];
        let is_blank = line == b"\r\n" || line == b"\n";
        if is_blank && line_start > 0 {
            break;
        }
        if is_blank {
            // Tolerate stray CRLF before the request line (RFC 9112 2.2).
            head.truncate(line_start);
        }
    }

    let head = std::str::from_utf8(&head).map_err(|_| RequestError::Encoding)?;
    UpgradeRequest::parse(head)
}
