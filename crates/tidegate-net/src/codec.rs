//! Fixed-header framing for the gateway's TCP streams.
//!
//! Every message on the wire is a header followed by an opaque body:
//!
//! ```text
//! +------------+----------------------+----------------------+----------------+
//! | msg_id     | player_id.high       | player_id.low        | body_len       |
//! | u16 LE     | u64 LE               | u64 LE               | u32 LE         |
//! +------------+----------------------+----------------------+----------------+
//! |                        body (body_len bytes)                              |
//! +---------------------------------------------------------------------------+
//! ```
//!
//! The header is always [`HEADER_LEN`] bytes. `body_len` does **not** include
//! the header. Frames are sent back-to-back with no delimiter, so a receiver
//! keeps decoding at the front of its buffer until it reports
//! [`DecodeError::Incomplete`].

use std::fmt;

/// Size of the fixed frame header in bytes.
pub const HEADER_LEN: usize = 2 + 8 + 8 + 4;

/// Default cap on a single frame body. Keeps a whole frame within 1 MiB.
pub const DEFAULT_MAX_BODY: u32 = (1 << 20) - HEADER_LEN as u32;

/// Globally unique 128-bit identifier for a client connection or player.
///
/// `high` is a namespace (for example a server or shard id), `low` is unique
/// within that namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ClientId {
    /// Namespace part.
    pub high: u64,
    /// Per-namespace part.
    pub low: u64,
}

impl ClientId {
    /// The all-zero id, used when a frame has no particular player target.
    pub const NIL: ClientId = ClientId { high: 0, low: 0 };

    /// Build an id from its two halves.
    pub const fn new(high: u64, low: u64) -> Self {
        Self { high, low }
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}-{:x}", self.high, self.low)
    }
}

/// Metadata prefixed to every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MessageHeader {
    /// Application message type. Zero is never valid on the wire.
    pub msg_id: u16,
    /// Originating or target player. Not the connection's own id.
    pub player_id: ClientId,
    /// Length of the body that follows the header.
    pub body_len: u32,
}

impl MessageHeader {
    /// Build a header for a body of `body_len` bytes.
    pub fn new(msg_id: u16, player_id: ClientId, body_len: u32) -> Self {
        Self {
            msg_id,
            player_id,
            body_len,
        }
    }

    /// Serialize the header into its fixed wire form.
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..2].copy_from_slice(&self.msg_id.to_le_bytes());
        out[2..10].copy_from_slice(&self.player_id.high.to_le_bytes());
        out[10..18].copy_from_slice(&self.player_id.low.to_le_bytes());
        out[18..22].copy_from_slice(&self.body_len.to_le_bytes());
        out
    }

    /// Parse a header from the first [`HEADER_LEN`] bytes of `buf`.
    ///
    /// Returns `None` when fewer than [`HEADER_LEN`] bytes are available.
    pub fn from_bytes(buf: &[u8]) -> Option<Self> {
        let raw: &[u8; HEADER_LEN] = buf.get(..HEADER_LEN)?.try_into().ok()?;
        let msg_id = u16::from_le_bytes([raw[0], raw[1]]);
        let high = u64::from_le_bytes(raw[2..10].try_into().ok()?);
        let low = u64::from_le_bytes(raw[10..18].try_into().ok()?);
        let body_len = u32::from_le_bytes(raw[18..22].try_into().ok()?);
        Some(Self {
            msg_id,
            player_id: ClientId::new(high, low),
            body_len,
        })
    }
}

/// Why a frame could not be decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum MalformedReason {
    /// The header bytes could not be parsed.
    #[error("unparseable header")]
    Header,
    /// `msg_id` was zero.
    #[error("message id 0")]
    ZeroMessageId,
    /// The declared body exceeds the configured maximum.
    #[error("body length {size} exceeds maximum {max}")]
    BodyTooLarge {
        /// Declared body length.
        size: u32,
        /// Configured maximum.
        max: u32,
    },
}

/// Errors that can occur while decoding a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// Not enough bytes for a full frame yet. Not a protocol error.
    #[error("incomplete frame")]
    Incomplete,

    /// The header is structurally invalid.
    #[error("malformed frame: {0}")]
    Malformed(MalformedReason),
}

/// Serialize `header` followed by `payload`.
///
/// The caller is responsible for `header.body_len` matching `payload.len()`.
pub fn encode(header: &MessageHeader, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(&header.to_bytes());
    out.extend_from_slice(payload);
    out
}

/// Decode the frame at the front of `buf` without consuming it.
///
/// On success returns the parsed header and its body length; the complete
/// frame occupies `buf[..HEADER_LEN + body_len]`.
pub fn decode(buf: &[u8], max_body: u32) -> Result<(MessageHeader, usize), DecodeError> {
    if buf.len() < HEADER_LEN {
        return Err(DecodeError::Incomplete);
    }

    let header =
        MessageHeader::from_bytes(buf).ok_or(DecodeError::Malformed(MalformedReason::Header))?;

    if header.msg_id == 0 {
        return Err(DecodeError::Malformed(MalformedReason::ZeroMessageId));
    }
    if header.body_len > max_body {
        return Err(DecodeError::Malformed(MalformedReason::BodyTooLarge {
            size: header.body_len,
            max: max_body,
        }));
    }

    let body_len = header.body_len as usize;
    if body_len > buf.len() - HEADER_LEN {
        return Err(DecodeError::Incomplete);
    }

    Ok((header, body_len))
}

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Parsed header.
    pub header: MessageHeader,
    /// Body bytes.
    pub payload: Vec<u8>,
}

/// Result of splitting a receive buffer into frames.
#[derive(Debug, Default)]
pub struct Dismantled {
    /// Complete frames, in stream order.
    pub frames: Vec<Frame>,
    /// Set when decoding stopped on a malformed header.
    pub malformed: Option<MalformedReason>,
}

/// Remove every complete frame from the front of `buf`.
///
/// A trailing partial frame is left in place for the next call. Decoding stops
/// at the first malformed header, leaving it (and everything after it) in the
/// buffer.
pub fn dismantle(buf: &mut Vec<u8>, max_body: u32) -> Dismantled {
    let mut out = Dismantled::default();
    let mut consumed = 0;

    loop {
        match decode(&buf[consumed..], max_body) {
            Ok((header, body_len)) => {
                let body_start = consumed + HEADER_LEN;
                out.frames.push(Frame {
                    header,
                    payload: buf[body_start..body_start + body_len].to_vec(),
                });
                consumed = body_start + body_len;
            }
            Err(DecodeError::Incomplete) => break,
            Err(DecodeError::Malformed(reason)) => {
                out.malformed = Some(reason);
                break;
            }
        }
    }

    buf.drain(..consumed);
    out
}
