//! Per-session inbound event queue bridging network callbacks and the drain pass.

use crossbeam_channel::{Receiver, Sender, TryRecvError, unbounded};

use crate::codec::{ClientId, MessageHeader};

/// An event produced by the network side for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// The connection was accepted and the session registered.
    Connected(ClientId),
    /// The transport reported the connection gone.
    Disconnected(ClientId),
    /// One complete frame arrived.
    Data {
        /// Decoded frame header.
        header: MessageHeader,
        /// Frame body.
        payload: Vec<u8>,
    },
}

/// FIFO queue of [`InboundEvent`]s owned by a single session.
///
/// `push` never blocks and may be called from any network thread. `pop` and
/// `count` are meant for the single drain-pass consumer.
pub struct Inbox {
    tx: Sender<InboundEvent>,
    rx: Receiver<InboundEvent>,
}

impl Inbox {
    /// Create an empty, unbounded inbox.
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }

    /// Append an event.
    pub fn push(&self, event: InboundEvent) {
        // Both ends live in `self`, so the channel cannot be disconnected.
        let _ = self.tx.send(event);
    }

    /// Take the oldest event, or `None` if the queue is empty right now.
    pub fn pop(&self) -> Option<InboundEvent> {
        match self.rx.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Number of events queued at the moment of calling.
    pub fn count(&self) -> usize {
        self.rx.len()
    }

    /// Whether no events are queued.
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

impl Default for Inbox {
    fn default() -> Self {
        Self::new()
    }
}
