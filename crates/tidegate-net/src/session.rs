//! Server-side state for one client connection.
//!
//! A session holds the bytes received but not yet framed, the inbox of events
//! waiting for the drain pass, and the liveness flags the drain pass and the
//! send path consult.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::codec::{self, ClientId, MalformedReason};
use crate::inbox::{InboundEvent, Inbox};
use crate::transport::ConnectionHandle;

/// Outcome of feeding received bytes into a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Ingest {
    /// Frames decoded and queued by this call.
    pub frames: usize,
    /// Set when this call halted the session's framing.
    pub halted: Option<HaltReason>,
}

/// Why a session stopped framing its input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaltReason {
    /// A frame header was invalid.
    Malformed(MalformedReason),
    /// Unframed bytes exceeded the receive buffer limit.
    BufferOverflow {
        /// Unframed bytes left after framing.
        size: usize,
        /// Configured limit.
        max: usize,
    },
}

/// One logical client connection.
pub struct Session {
    id: ClientId,
    handle: ConnectionHandle,
    recv_buf: Mutex<Vec<u8>>,
    inbox: Inbox,
    needs_removal: AtomicBool,
    halted: AtomicBool,
}

impl Session {
    /// Create a session with an empty buffer and inbox.
    pub fn new(id: ClientId, handle: ConnectionHandle) -> Self {
        Self {
            id,
            handle,
            recv_buf: Mutex::new(Vec::new()),
            inbox: Inbox::new(),
            needs_removal: AtomicBool::new(false),
            halted: AtomicBool::new(false),
        }
    }

    /// The session's client id.
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// The transport handle this session sends through.
    pub fn handle(&self) -> ConnectionHandle {
        self.handle
    }

    /// The session's inbound event queue.
    pub fn inbox(&self) -> &Inbox {
        &self.inbox
    }

    /// Whether the drain pass has processed this session's disconnect.
    pub fn needs_removal(&self) -> bool {
        self.needs_removal.load(Ordering::Acquire)
    }

    /// Mark the session for removal at the end of the current drain pass.
    pub fn set_needs_removal(&self, value: bool) {
        self.needs_removal.store(value, Ordering::Release);
    }

    /// Whether framing stopped after bad input. Further data is discarded.
    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::Acquire)
    }

    /// Number of received bytes not yet framed.
    pub fn buffered_len(&self) -> usize {
        self.recv_buf
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Append received bytes and queue one [`InboundEvent::Data`] per complete
    /// frame now available.
    pub fn ingest(&self, bytes: &[u8], max_body: u32, max_buffer: usize) -> Ingest {
        if self.is_halted() {
            return Ingest::default();
        }

        let mut buf = self.recv_buf.lock().unwrap_or_else(PoisonError::into_inner);
        buf.extend_from_slice(bytes);

        let out = codec::dismantle(&mut buf, max_body);
        let frames = out.frames.len();
        for frame in out.frames {
            self.inbox.push(InboundEvent::Data {
                header: frame.header,
                payload: frame.payload,
            });
        }

        // The cap applies to what is left over after framing.
        let halted = match out.malformed {
            Some(reason) => Some(HaltReason::Malformed(reason)),
            None if buf.len() > max_buffer => Some(HaltReason::BufferOverflow {
                size: buf.len(),
                max: max_buffer,
            }),
            None => None,
        };

        match halted {
            Some(reason) => {
                buf.clear();
                self.halted.store(true, Ordering::Release);
                Ingest {
                    frames,
                    halted: Some(reason),
                }
            }
            None => Ingest {
                frames,
                halted: None,
            },
        }
    }

}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("handle", &self.handle)
            .field("queued", &self.inbox.count())
            .field("needs_removal", &self.needs_removal())
            .field("halted", &self.is_halted())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{DEFAULT_MAX_BODY, HEADER_LEN, MessageHeader, encode};

    const MAX_BUF: usize = 1 << 20;

    fn session() -> Session {
        Session::new(ClientId::new(0, 1), ConnectionHandle(1))
    }

    fn frame(msg_id: u16, body: &[u8]) -> Vec<u8> {
        encode(
            &MessageHeader::new(msg_id, ClientId::NIL, body.len() as u32),
            body,
        )
    }

    #[test]
    fn test_new_session_is_live_and_empty() {
        let s = session();
        assert!(!s.needs_removal());
        assert!(!s.is_halted());
        assert_eq!(s.buffered_len(), 0);
        assert_eq!(s.inbox().count(), 0);
    }

    #[test]
    fn test_ingest_queues_complete_frames() {
        let s = session();
        let mut bytes = frame(1, b"one");
        bytes.extend(frame(2, b"two"));

        let result = s.ingest(&bytes, DEFAULT_MAX_BODY, MAX_BUF);
        assert_eq!(result.frames, 2);
        assert_eq!(s.inbox().count(), 2);
        assert_eq!(s.buffered_len(), 0);
    }

    #[test]
    fn test_ingest_buffers_partial_frame() {
        let s = session();
        let bytes = frame(1, b"split me");

        let first = s.ingest(&bytes[..HEADER_LEN + 3], DEFAULT_MAX_BODY, MAX_BUF);
        assert_eq!(first.frames, 0);
        assert_eq!(s.buffered_len(), HEADER_LEN + 3);

        let second = s.ingest(&bytes[HEADER_LEN + 3..], DEFAULT_MAX_BODY, MAX_BUF);
        assert_eq!(second.frames, 1);
        match s.inbox().pop() {
            Some(InboundEvent::Data { header, payload }) => {
                assert_eq!(header.msg_id, 1);
                assert_eq!(payload, b"split me");
            }
            other => panic!("expected data event, got {other:?}"),
        }
    }

    #[test]
    fn test_malformed_frame_halts_session() {
        let s = session();
        let mut bytes = frame(4, b"good");
        bytes.extend(frame(0, b"bad"));

        let result = s.ingest(&bytes, DEFAULT_MAX_BODY, MAX_BUF);
        assert_eq!(result.frames, 1, "frames before the bad header still count");
        assert_eq!(
            result.halted,
            Some(HaltReason::Malformed(MalformedReason::ZeroMessageId))
        );
        assert!(s.is_halted());

        let after = s.ingest(&frame(5, b"late"), DEFAULT_MAX_BODY, MAX_BUF);
        assert_eq!(after, Ingest::default());
        assert_eq!(s.inbox().count(), 1);
    }

    #[test]
    fn test_buffer_overflow_halts_session() {
        let s = session();
        let header = MessageHeader::new(1, ClientId::NIL, 1000);
        let mut bytes = header.to_bytes().to_vec();
        bytes.extend_from_slice(&[7u8; 40]);

        let result = s.ingest(&bytes, DEFAULT_MAX_BODY, 32);
        assert_eq!(
            result.halted,
            Some(HaltReason::BufferOverflow {
                size: HEADER_LEN + 40,
                max: 32
            })
        );
        assert!(s.is_halted());
        assert_eq!(s.buffered_len(), 0);
    }

    #[test]
    fn test_cap_counts_only_unframed_bytes() {
        let s = session();
        let mut bytes = frame(1, b"one");
        bytes.extend(frame(2, b"two"));
        bytes.extend_from_slice(&frame(3, b"three")[..4]);

        // Whole chunk is larger than the cap, the leftover is not.
        let result = s.ingest(&bytes, DEFAULT_MAX_BODY, 8);
        assert_eq!(result.frames, 2);
        assert_eq!(result.halted, None);
        assert_eq!(s.buffered_len(), 4);
    }

    #[test]
    fn test_max_size_frame_in_misaligned_chunks() {
        let s = session();
        let mut stream = frame(1, &[1u8; 10]);
        stream.extend(frame(2, &vec![2u8; DEFAULT_MAX_BODY as usize]));
        stream.extend(frame(3, b"tail"));

        let mut total = 0;
        for chunk in stream.chunks(4096) {
            let result = s.ingest(chunk, DEFAULT_MAX_BODY, MAX_BUF);
            assert_eq!(result.halted, None, "legal stream must not halt");
            total += result.frames;
        }

        assert_eq!(total, 3);
        assert!(!s.is_halted());
        assert_eq!(s.buffered_len(), 0);
        let ids: Vec<u16> = std::iter::from_fn(|| s.inbox().pop())
            .map(|event| match event {
                InboundEvent::Data { header, .. } => header.msg_id,
                other => panic!("expected data event, got {other:?}"),
            })
            .collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_needs_removal_flag() {
        let s = session();
        s.set_needs_removal(true);
        assert!(s.needs_removal());
    }
}
