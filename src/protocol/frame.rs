//! WebSocket frame model and wire serialization.
//!
//! # Frame Format (RFC 6455 Section 5.2)
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+ - - - - - - - - - - - - - - - +
//! |     Extended payload length continued, if payload len == 127  |
//! + - - - - - - - - - - - - - - - +-------------------------------+
//! |                               |Masking-key, if MASK set to 1  |
//! +-------------------------------+-------------------------------+
//! | Masking-key (continued)       |          Payload Data         |
//! +-------------------------------- - - - - - - - - - - - - - - - +
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use super::close::ClosePayload;
use super::error::ProtocolError;

/// Largest payload a control frame may carry.
pub const MAX_CONTROL_PAYLOAD: usize = 125;

/// Frame opcode (4 bits).
///
/// Values outside the six defined opcodes map to [`Opcode::Reserved`], which is
/// rejected wherever it appears.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
    Reserved(u8),
}

impl Opcode {
    /// Close, Ping or Pong.
    pub const fn is_control(self) -> bool {
        matches!(self, Opcode::Close | Opcode::Ping | Opcode::Pong)
    }

    /// Continuation, Text or Binary.
    pub const fn is_data(self) -> bool {
        matches!(self, Opcode::Continuation | Opcode::Text | Opcode::Binary)
    }

    /// Wire value (low nibble of the first header byte).
    pub const fn as_u8(self) -> u8 {
        match self {
            Opcode::Continuation => 0x0,
            Opcode::Text => 0x1,
            Opcode::Binary => 0x2,
            Opcode::Close => 0x8,
            Opcode::Ping => 0x9,
            Opcode::Pong => 0xA,
            Opcode::Reserved(v) => v & 0x0F,
        }
    }

    /// Short lowercase name used for logging and metric labels.
    pub const fn name(self) -> &'static str {
        match self {
            Opcode::Continuation => "continuation",
            Opcode::Text => "text",
            Opcode::Binary => "binary",
            Opcode::Close => "close",
            Opcode::Ping => "ping",
            Opcode::Pong => "pong",
            Opcode::Reserved(_) => "reserved",
        }
    }
}

impl From<u8> for Opcode {
    fn from(value: u8) -> Self {
        match value & 0x0F {
            0x0 => Opcode::Continuation,
            0x1 => Opcode::Text,
            0x2 => Opcode::Binary,
            0x8 => Opcode::Close,
            0x9 => Opcode::Ping,
            0xA => Opcode::Pong,
            other => Opcode::Reserved(other),
        }
    }
}

/// A single WebSocket frame.
///
/// `payload` always holds the unmasked bytes. When `mask` is set the encoder
/// masks on the way out and the decoder records the key it unmasked with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: Opcode,
    pub mask: Option<[u8; 4]>,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(fin: bool, opcode: Opcode, payload: impl Into<Bytes>) -> Self {
        Self {
            fin,
            opcode,
            mask: None,
            payload: payload.into(),
        }
    }

    pub fn text(payload: impl Into<Bytes>) -> Self {
        Self::new(true, Opcode::Text, payload)
    }

    pub fn binary(payload: impl Into<Bytes>) -> Self {
        Self::new(true, Opcode::Binary, payload)
    }

    pub fn continuation(fin: bool, payload: impl Into<Bytes>) -> Self {
        Self::new(fin, Opcode::Continuation, payload)
    }

    pub fn ping(payload: impl Into<Bytes>) -> Self {
        Self::new(true, Opcode::Ping, payload)
    }

    pub fn pong(payload: impl Into<Bytes>) -> Self {
        Self::new(true, Opcode::Pong, payload)
    }

    /// Close frame with an optional status code and reason.
    ///
    /// The reason is only written when a code is present.
    pub fn close(code: Option<u16>, reason: &str) -> Self {
        Self::new(true, Opcode::Close, ClosePayload::encode(code, reason))
    }

    /// Set an explicit masking key.
    pub fn with_mask(mut self, key: [u8; 4]) -> Self {
        self.mask = Some(key);
        self
    }

    /// Mask with a freshly generated random key (client role).
    pub fn masked(self) -> Self {
        self.with_mask(rand::random::<[u8; 4]>())
    }

    pub fn is_masked(&self) -> bool {
        self.mask.is_some()
    }

    /// Check the per-frame invariants shared by encoder and decoder.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if let Opcode::Reserved(op) = self.opcode {
            return Err(ProtocolError::InvalidOpcode(op));
        }
        if self.opcode.is_control() {
            if !self.fin {
                return Err(ProtocolError::FragmentedControlFrame);
            }
            if self.payload.len() > MAX_CONTROL_PAYLOAD {
                return Err(ProtocolError::ControlFrameTooLarge(self.payload.len() as u64));
            }
        }
        Ok(())
    }

    /// Size of the encoded header for this frame.
    pub fn header_len(&self) -> usize {
        let len = self.payload.len();
        let ext = if len < 126 {
            0
        } else if len <= u16::MAX as usize {
            2
        } else {
            8
        };
        2 + ext + if self.mask.is_some() { 4 } else { 0 }
    }

    /// Serialize into `dst` using the minimal length encoding.
    pub fn encode_into(&self, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        self.validate()?;

        let len = self.payload.len();
        dst.reserve(self.header_len() + len);

        let mut first = self.opcode.as_u8();
        if self.fin {
            first |= 0x80;
        }
        dst.put_u8(first);

        let mask_bit = if self.mask.is_some() { 0x80 } else { 0x00 };
        if len < 126 {
            dst.put_u8(mask_bit | len as u8);
        } else if len <= u16::MAX as usize {
            dst.put_u8(mask_bit | 126);
            dst.put_u16(len as u16);
        } else {
            dst.put_u8(mask_bit | 127);
            dst.put_u64(len as u64);
        }

        match self.mask {
            Some(key) => {
                dst.put_slice(&key);
                let start = dst.len();
                dst.put_slice(&self.payload);
                apply_mask(&mut dst[start..], key);
            }
            None => dst.put_slice(&self.payload),
        }
        Ok(())
    }

    /// Serialize into a fresh buffer.
    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        let mut buf = BytesMut::with_capacity(self.header_len() + self.payload.len());
        self.encode_into(&mut buf)?;
        Ok(buf.freeze())
    }
}

/// XOR `data` with the 4-byte masking key in place.
///
/// Masking and unmasking are the same operation: applying it twice with the
/// same key restores the input.
pub fn apply_mask(data: &mut [u8], key: [u8; 4]) {
    let mut chunks = data.chunks_exact_mut(4);
    for chunk in &mut chunks {
        chunk[0] ^= key[0];
        chunk[1] ^= key[1];
        chunk[2] ^= key[2];
        chunk[3] ^= key[3];
    }
    for (i, byte) in chunks.into_remainder().iter_mut().enumerate() {
        *byte ^= key[i];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_from_wire_value() {
        assert_eq!(Opcode::from(0x1), Opcode::Text);
        assert_eq!(Opcode::from(0xA), Opcode::Pong);
        assert_eq!(Opcode::from(0x3), Opcode::Reserved(0x3));
        assert_eq!(Opcode::from(0xB).as_u8(), 0xB);
        assert!(Opcode::Ping.is_control());
        assert!(Opcode::Continuation.is_data());
        assert!(!Opcode::Reserved(0xF).is_control());
    }

    #[test]
    fn mask_matches_bytewise_definition() {
        let key = [0x37, 0xfa, 0x21, 0x3d];
        let original = b"Hello, masking world".to_vec();
        let mut data = original.clone();
        apply_mask(&mut data, key);
        for (i, byte) in data.iter().enumerate() {
            assert_eq!(*byte, original[i] ^ key[i % 4]);
        }
        apply_mask(&mut data, key);
        assert_eq!(data, original);
    }

    #[test]
    fn rfc_single_frame_unmasked_text() {
        // RFC 6455 5.7: unmasked "Hello"
        let bytes = Frame::text("Hello").encode().unwrap();
        assert_eq!(&bytes[..], &[0x81, 0x05, 0x48, 0x65, 0x6c, 0x6c, 0x6f]);
    }

    #[test]
    fn rfc_single_frame_masked_text() {
        // RFC 6455 5.7: masked "Hello"
        let bytes = Frame::text("Hello")
            .with_mask([0x37, 0xfa, 0x21, 0x3d])
            .encode()
            .unwrap();
        assert_eq!(
            &bytes[..],
            &[0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58]
        );
    }

    #[test]
    fn length_encoding_boundaries() {
        let cases = [(0usize, 2usize), (125, 2), (126, 4), (65_535, 4), (65_536, 10)];
        for (len, header) in cases {
            let frame = Frame::binary(vec![0u8; len]);
            assert_eq!(frame.header_len(), header, "len {len}");
            let bytes = frame.encode().unwrap();
            assert_eq!(bytes.len(), header + len);
            match header {
                2 => assert_eq!(bytes[1] as usize, len),
                4 => {
                    assert_eq!(bytes[1], 126);
                    assert_eq!(u16::from_be_bytes([bytes[2], bytes[3]]) as usize, len);
                }
                _ => {
                    assert_eq!(bytes[1], 127);
                    let mut raw = [0u8; 8];
                    raw.copy_from_slice(&bytes[2..10]);
                    assert_eq!(u64::from_be_bytes(raw) as usize, len);
                }
            }
        }
    }

    #[test]
    fn control_frames_are_validated_on_encode() {
        let too_big = Frame::ping(vec![0u8; 126]);
        assert_eq!(too_big.encode(), Err(ProtocolError::ControlFrameTooLarge(126)));

        let fragmented = Frame::new(false, Opcode::Pong, Bytes::new());
        assert_eq!(fragmented.encode(), Err(ProtocolError::FragmentedControlFrame));

        let reserved = Frame::new(true, Opcode::Reserved(0x5), Bytes::new());
        assert_eq!(reserved.encode(), Err(ProtocolError::InvalidOpcode(0x5)));
    }

    #[test]
    fn close_frame_carries_code_and_reason() {
        let frame = Frame::close(Some(1000), "bye");
        assert_eq!(&frame.payload[..], &[0x03, 0xE8, b'b', b'y', b'e']);
        assert!(Frame::close(None, "ignored").payload.is_empty());
    }
}
