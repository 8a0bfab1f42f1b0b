//! Close frame payloads (RFC 6455 Section 5.5.1 and 7.4).

use bytes::{BufMut, Bytes, BytesMut};

use super::error::ProtocolError;

/// Well-known close status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCode {
    Normal,
    GoingAway,
    Protocol,
    Unsupported,
    InvalidPayload,
    PolicyViolation,
    TooBig,
    MandatoryExtension,
    Internal,
}

impl CloseCode {
    pub const fn as_u16(self) -> u16 {
        match self {
            CloseCode::Normal => 1000,
            CloseCode::GoingAway => 1001,
            CloseCode::Protocol => 1002,
            CloseCode::Unsupported => 1003,
            CloseCode::InvalidPayload => 1007,
            CloseCode::PolicyViolation => 1008,
            CloseCode::TooBig => 1009,
            CloseCode::MandatoryExtension => 1010,
            CloseCode::Internal => 1011,
        }
    }

    /// Whether `code` may appear in a Close frame on the wire.
    ///
    /// 1005, 1006 and 1015 are reserved for local reporting only.
    pub const fn is_sendable(code: u16) -> bool {
        matches!(code, 1000..=1003 | 1007..=1014 | 3000..=4999)
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> Self {
        code.as_u16()
    }
}

/// Parsed body of a Close frame.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClosePayload {
    pub code: Option<u16>,
    pub reason: String,
}

impl ClosePayload {
    /// Parse and validate a Close frame payload.
    pub fn parse(payload: &[u8]) -> Result<Self, ProtocolError> {
        match payload.len() {
            0 => Ok(Self::default()),
            1 => Err(ProtocolError::InvalidClosePayload),
            _ => {
                let code = u16::from_be_bytes([payload[0], payload[1]]);
                if !CloseCode::is_sendable(code) {
                    return Err(ProtocolError::InvalidCloseCode(code));
                }
                let reason = std::str::from_utf8(&payload[2..])
                    .map_err(|_| ProtocolError::InvalidUtf8)?
                    .to_owned();
                Ok(Self {
                    code: Some(code),
                    reason,
                })
            }
        }
    }

    /// Encode a close body. Without a code the body is empty.
    pub fn encode(code: Option<u16>, reason: &str) -> Bytes {
        match code {
            Some(code) => {
                let mut buf = BytesMut::with_capacity(2 + reason.len());
                buf.put_u16(code);
                buf.put_slice(reason.as_bytes());
                buf.freeze()
            }
            None => Bytes::new(),
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        Self::encode(self.code, &self.reason)
    }
}
