//! The socket layer the gateway sits on.
//!
//! A transport owns the real connections. It reports new connections, received
//! bytes and disconnects to the [`Gateway`](crate::Gateway) through its
//! `on_connected` / `on_data` / `on_disconnected` callbacks, and performs the
//! raw sends and closes the gateway asks for.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Opaque, stable handle for one transport connection.
///
/// Must be unique among live connections of a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionHandle(pub u64);

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Atomic generator for monotonically increasing [`ConnectionHandle`]s.
pub struct IdGenerator {
    next: AtomicU64,
}

impl IdGenerator {
    /// Create a new generator starting at 1.
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Return the next unique [`ConnectionHandle`].
    pub fn next_id(&self) -> ConnectionHandle {
        ConnectionHandle(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Errors reported by a [`Transport`].
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The transport has no connection with this handle.
    #[error("unknown connection {0}")]
    UnknownHandle(ConnectionHandle),

    /// The connection exists but is already shutting down.
    #[error("connection {0} is closed")]
    Closed(ConnectionHandle),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Raw send/close operations the gateway needs from the socket layer.
///
/// Both operations must not block on network I/O; implementations queue the
/// work and return.
pub trait Transport: Send + Sync + 'static {
    /// Queue `bytes` for transmission on `handle`.
    fn send(&self, handle: ConnectionHandle, bytes: &[u8]) -> Result<(), TransportError>;

    /// Ask the transport to close `handle`. The transport reports the
    /// disconnect back through the usual callback once it happens.
    fn close(&self, handle: ConnectionHandle);
}
