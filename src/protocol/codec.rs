//! Streaming frame codec.
//!
//! # Responsibilities
//! - Decode frames from a byte buffer that fills in arbitrary chunk sizes
//! - Encode frames with the minimal length encoding
//! - Reject reserved bits, reserved opcodes and malformed control frames
//!
//! # Design Decisions
//! - Decoding is a resumable state machine: partial headers and partial
//!   payloads stay buffered until enough bytes arrive
//! - Payload capacity is reserved once the length is known, bounded by
//!   `max_frame_size`
//! - No role policy here; the session decides whether unmasked input is legal

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::error::{ProtocolError, WsError};
use super::frame::{apply_mask, Frame, Opcode, MAX_CONTROL_PAYLOAD};

#[derive(Debug, Clone, Copy)]
struct Header {
    fin: bool,
    opcode: Opcode,
    masked: bool,
}

#[derive(Debug, Clone, Copy)]
enum DecodeState {
    /// Waiting for the two fixed header bytes.
    Header,
    /// Waiting for a 2 or 8 byte extended length.
    ExtendedLength { header: Header, width: usize },
    /// Waiting for the 4 byte masking key.
    MaskKey { header: Header, len: usize },
    /// Waiting for `len` payload bytes.
    Payload {
        header: Header,
        len: usize,
        mask: Option<[u8; 4]>,
    },
}

/// RFC 6455 frame codec for use with `FramedRead`/`FramedWrite`.
#[derive(Debug)]
pub struct FrameCodec {
    max_frame_size: usize,
    state: DecodeState,
}

impl FrameCodec {
    /// Default maximum payload size of a single frame (16 MiB).
    pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

    pub fn new() -> Self {
        Self::with_max_frame_size(Self::DEFAULT_MAX_FRAME_SIZE)
    }

    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            max_frame_size,
            state: DecodeState::Header,
        }
    }

    fn after_length(&self, header: Header, len: u64) -> Result<DecodeState, ProtocolError> {
        if len > self.max_frame_size as u64 {
            return Err(ProtocolError::FrameTooLarge {
                size: len,
                max: self.max_frame_size,
            });
        }
        let len = len as usize;
        Ok(if header.masked {
            DecodeState::MaskKey { header, len }
        } else {
            DecodeState::Payload {
                header,
                len,
                mask: None,
            }
        })
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = WsError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, WsError> {
        loop {
            match self.state {
                DecodeState::Header => {
                    if src.len() < 2 {
                        return Ok(None);
                    }
                    let first = src[0];
                    let second = src[1];

                    if first & 0x70 != 0 {
                        return Err(ProtocolError::ReservedBitsSet.into());
                    }
                    let header = Header {
                        fin: first & 0x80 != 0,
                        opcode: Opcode::from(first & 0x0F),
                        masked: second & 0x80 != 0,
                    };
                    if let Opcode::Reserved(op) = header.opcode {
                        return Err(ProtocolError::InvalidOpcode(op).into());
                    }

                    let base_len = second & 0x7F;
                    if header.opcode.is_control() {
                        if !header.fin {
                            return Err(ProtocolError::FragmentedControlFrame.into());
                        }
                        if base_len as usize > MAX_CONTROL_PAYLOAD {
                            return Err(ProtocolError::ControlFrameTooLarge(base_len as u64).into());
                        }
                    }
                    src.advance(2);

                    self.state = match base_len {
                        126 => DecodeState::ExtendedLength { header, width: 2 },
                        127 => DecodeState::ExtendedLength { header, width: 8 },
                        len => self.after_length(header, len as u64)?,
                    };
                }
                DecodeState::ExtendedLength { header, width } => {
                    if src.len() < width {
                        return Ok(None);
                    }
                    let len = if width == 2 {
                        src.get_u16() as u64
                    } else {
                        src.get_u64()
                    };
                    if len & (1 << 63) != 0 {
                        self.state = DecodeState::Header;
                        return Err(ProtocolError::LengthOverflow.into());
                    }
                    self.state = match self.after_length(header, len) {
                        Ok(next) => next,
                        Err(e) => {
                            self.state = DecodeState::Header;
                            return Err(e.into());
                        }
                    };
                }
                DecodeState::MaskKey { header, len } => {
                    if src.len() < 4 {
                        return Ok(None);
                    }
                    let mut key = [0u8; 4];
                    src.copy_to_slice(&mut key);
                    self.state = DecodeState::Payload {
                        header,
                        len,
                        mask: Some(key),
                    };
                }
                DecodeState::Payload { header, len, mask } => {
                    if src.len() < len {
                        src.reserve(len - src.len());
                        return Ok(None);
                    }
                    let mut payload = src.split_to(len);
                    if let Some(key) = mask {
                        apply_mask(&mut payload, key);
                    }
                    self.state = DecodeState::Header;
                    return Ok(Some(Frame {
                        fin: header.fin,
                        opcode: header.opcode,
                        mask,
                        payload: payload.freeze(),
                    }));
                }
            }
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = WsError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), WsError> {
        frame.encode_into(dst)?;
        Ok(())
    }
}

impl Encoder<&Frame> for FrameCodec {
    type Error = WsError;

    fn encode(&mut self, frame: &Frame, dst: &mut BytesMut) -> Result<(), WsError> {
        frame.encode_into(dst)?;
        Ok(())
    }
}
