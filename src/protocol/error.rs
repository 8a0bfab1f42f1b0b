//! Protocol-level error definitions.

use std::io;
use thiserror::Error;

/// A violation of the framing or messaging rules.
///
/// Any of these ends the session abruptly: no close handshake is attempted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Opcode in the reserved ranges 0x3-0x7 or 0xB-0xF.
    #[error("invalid opcode: 0x{0:X}")]
    InvalidOpcode(u8),

    /// RSV1-3 set without a negotiated extension that defines them.
    #[error("reserved bits set without extension")]
    ReservedBitsSet,

    /// Control frame carried more than 125 payload bytes.
    #[error("control frame payload too large: {0} bytes (max: 125)")]
    ControlFrameTooLarge(u64),

    /// Control frame had FIN cleared.
    #[error("control frame cannot be fragmented")]
    FragmentedControlFrame,

    /// 64-bit length with the most significant bit set.
    #[error("payload length has the most significant bit set")]
    LengthOverflow,

    /// Single frame larger than the configured limit.
    #[error("frame payload too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: u64, max: usize },

    /// Reassembled message larger than the configured limit.
    #[error("message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// Continuation frame with no fragmented message in progress.
    #[error("continuation frame without a started message")]
    UnexpectedContinuation,

    /// New Text/Binary frame while a fragmented message is still open.
    #[error("data frame interleaved with an unfinished fragmented message")]
    InterleavedDataFrame,

    /// Client-to-server frame without a masking key.
    #[error("client frame must be masked")]
    UnmaskedClientFrame,

    /// Text message or close reason that is not valid UTF-8.
    #[error("invalid UTF-8 in text payload")]
    InvalidUtf8,

    /// Close payload of one byte.
    #[error("invalid close frame payload")]
    InvalidClosePayload,

    /// Close status code outside the ranges allowed on the wire.
    #[error("invalid close code: {0}")]
    InvalidCloseCode(u16),
}

/// Error type produced by [`FrameCodec`](super::FrameCodec).
#[derive(Debug, Error)]
pub enum WsError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
