//! Data messages and fragment reassembly.
//!
//! # Responsibilities
//! - Join a Text/Binary frame with its Continuation frames into one message
//! - Reject continuation frames without a started message
//! - Reject a new data message before the fragmented one finishes
//! - Enforce the message size limit and the UTF-8 rule for Text messages

use bytes::{Bytes, BytesMut};

use super::error::ProtocolError;
use super::frame::{Frame, Opcode};

/// A complete data message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Text(String),
    Binary(Bytes),
}

impl Message {
    pub fn text(text: impl Into<String>) -> Self {
        Message::Text(text.into())
    }

    pub fn binary(data: impl Into<Bytes>) -> Self {
        Message::Binary(data.into())
    }

    pub fn opcode(&self) -> Opcode {
        match self {
            Message::Text(_) => Opcode::Text,
            Message::Binary(_) => Opcode::Binary,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Message::Text(text) => text.len(),
            Message::Binary(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Message::Text(text) => text.as_bytes(),
            Message::Binary(data) => data,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Message::Text(text) => Some(text),
            Message::Binary(_) => None,
        }
    }

    /// Single unfragmented, unmasked frame carrying this message.
    pub fn into_frame(self) -> Frame {
        match self {
            Message::Text(text) => Frame::text(text),
            Message::Binary(data) => Frame::binary(data),
        }
    }

    fn from_parts(opcode: Opcode, payload: Bytes) -> Result<Self, ProtocolError> {
        match opcode {
            Opcode::Text => String::from_utf8(payload.to_vec())
                .map(Message::Text)
                .map_err(|_| ProtocolError::InvalidUtf8),
            _ => Ok(Message::Binary(payload)),
        }
    }
}

#[derive(Debug)]
struct Partial {
    opcode: Opcode,
    buf: BytesMut,
}

/// Per-connection fragment reassembly state.
#[derive(Debug)]
pub struct Reassembler {
    max_message_size: usize,
    partial: Option<Partial>,
}

impl Reassembler {
    pub fn new(max_message_size: usize) -> Self {
        Self {
            max_message_size,
            partial: None,
        }
    }

    /// Whether a fragmented message is waiting for more frames.
    pub fn in_progress(&self) -> bool {
        self.partial.is_some()
    }

    /// Feed one data frame. Returns the message once its final frame arrives.
    ///
    /// Control frames must not be passed here; they interleave freely and are
    /// handled by the caller.
    pub fn push(&mut self, frame: Frame) -> Result<Option<Message>, ProtocolError> {
        match frame.opcode {
            Opcode::Text | Opcode::Binary => {
                if self.partial.is_some() {
                    return Err(ProtocolError::InterleavedDataFrame);
                }
                self.check_size(frame.payload.len())?;
                if frame.fin {
                    return Message::from_parts(frame.opcode, frame.payload).map(Some);
                }
                let mut buf = BytesMut::with_capacity(frame.payload.len());
                buf.extend_from_slice(&frame.payload);
                self.partial = Some(Partial {
                    opcode: frame.opcode,
                    buf,
                });
                Ok(None)
            }
            Opcode::Continuation => {
                let total = match &self.partial {
                    Some(partial) => partial.buf.len() + frame.payload.len(),
                    None => return Err(ProtocolError::UnexpectedContinuation),
                };
                self.check_size(total)?;
                let Some(partial) = self.partial.as_mut() else {
                    return Err(ProtocolError::UnexpectedContinuation);
                };
                partial.buf.extend_from_slice(&frame.payload);
                if !frame.fin {
                    return Ok(None);
                }
                match self.partial.take() {
                    Some(done) => Message::from_parts(done.opcode, done.buf.freeze()).map(Some),
                    None => Err(ProtocolError::UnexpectedContinuation),
                }
            }
            Opcode::Reserved(op) => Err(ProtocolError::InvalidOpcode(op)),
            Opcode::Close | Opcode::Ping | Opcode::Pong => Ok(None),
        }
    }

    fn check_size(&mut self, size: usize) -> Result<(), ProtocolError> {
        if size > self.max_message_size {
            self.partial = None;
            return Err(ProtocolError::MessageTooLarge {
                size,
                max: self.max_message_size,
            });
        }
        Ok(())
    }
}
