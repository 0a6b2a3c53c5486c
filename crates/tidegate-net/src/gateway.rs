//! The session gateway: transport callbacks in, application callbacks out.
//!
//! Network threads call [`Gateway::on_connected`], [`Gateway::on_data`] and
//! [`Gateway::on_disconnected`]. These only touch the target session's buffer
//! and inbox. A single logic thread calls [`Gateway::update`] periodically to
//! drain every inbox into the injected [`MessageHandler`] and
//! [`EventHandler`], and to drop sessions whose disconnect has been handled.
//!
//! Application code sends through [`Gateway::send_to`],
//! [`Gateway::send_with_header`], [`Gateway::broadcast`] and
//! [`Gateway::broadcast_with_header`]. None of these hold the registry lock
//! while calling into the transport or the handlers, so handlers may send
//! freely from inside a drain pass.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::codec::{self, ClientId, DEFAULT_MAX_BODY, HEADER_LEN, MessageHeader};
use crate::inbox::InboundEvent;
use crate::registry::{RegistryError, SessionRegistry};
use crate::session::{HaltReason, Session};
use crate::transport::{ConnectionHandle, Transport, TransportError};

/// Connection lifecycle events delivered to the [`EventHandler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetEvent {
    /// A client connected.
    Connected,
    /// A client disconnected. Its session is dropped after this pass.
    Disconnected,
}

/// Receives every decoded frame during [`Gateway::update`].
pub trait MessageHandler: Send + Sync {
    /// Called once per frame with its header, message type, body and the
    /// sending connection's id.
    fn on_message(&self, header: &MessageHeader, msg_id: u16, payload: &[u8], client: ClientId);
}

impl<F> MessageHandler for F
where
    F: Fn(&MessageHeader, u16, &[u8], ClientId) + Send + Sync,
{
    fn on_message(&self, header: &MessageHeader, msg_id: u16, payload: &[u8], client: ClientId) {
        self(header, msg_id, payload, client)
    }
}

/// Receives connect and disconnect notifications during [`Gateway::update`].
pub trait EventHandler: Send + Sync {
    /// Called once per lifecycle event.
    fn on_event(&self, event: NetEvent, client: ClientId, server_id: i32);
}

impl<F> EventHandler for F
where
    F: Fn(NetEvent, ClientId, i32) + Send + Sync,
{
    fn on_event(&self, event: NetEvent, client: ClientId, server_id: i32) {
        self(event, client, server_id)
    }
}

/// Application callbacks, fixed for the gateway's lifetime.
#[derive(Clone)]
pub struct Handlers {
    /// Frame callback.
    pub messages: Arc<dyn MessageHandler>,
    /// Lifecycle callback.
    pub events: Arc<dyn EventHandler>,
}

impl Handlers {
    /// Bundle a message handler and an event handler.
    pub fn new(
        messages: impl MessageHandler + 'static,
        events: impl EventHandler + 'static,
    ) -> Self {
        Self {
            messages: Arc::new(messages),
            events: Arc::new(events),
        }
    }
}

/// Configuration for [`Gateway`].
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Id passed to every [`EventHandler`] call. Default: 1.
    pub server_id: i32,
    /// Maximum registered sessions. Default: 1024.
    pub max_clients: usize,
    /// High half of every [`ClientId`] this gateway assigns. Default: 0.
    pub client_id_namespace: u64,
    /// Maximum frame body, in bytes. Default: [`DEFAULT_MAX_BODY`].
    pub max_frame_body: u32,
    /// Maximum unframed bytes buffered per session. Default: 1 MiB.
    pub max_recv_buffer: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            server_id: 1,
            max_clients: 1024,
            client_id_namespace: 0,
            max_frame_body: DEFAULT_MAX_BODY,
            max_recv_buffer: 1 << 20,
        }
    }
}

/// Errors returned by the gateway's send API.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// No live session with this id.
    #[error("unknown or closed session {0}")]
    UnknownOrClosedSession(ClientId),

    /// Encoding produced an unexpected number of bytes.
    #[error("encoded frame is {actual} bytes, expected {expected}")]
    EncodeMismatch {
        /// Header plus payload length.
        expected: usize,
        /// Bytes actually produced.
        actual: usize,
    },

    /// Message id 0 is reserved and never valid on the wire.
    #[error("message id 0 is not a valid message type")]
    InvalidMessageId,

    /// The payload does not fit in one frame.
    #[error("payload size {size} exceeds maximum {max}")]
    PayloadTooLarge {
        /// Payload length.
        size: usize,
        /// Configured maximum body length.
        max: u32,
    },

    /// The transport refused the send.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// What one [`Gateway::update`] call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UpdateStats {
    /// Events handed to the handlers.
    pub events: usize,
    /// Sessions dropped after their disconnect was handled.
    pub removed: usize,
}

/// Result of a broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BroadcastReport {
    /// Sessions a send was attempted on.
    pub attempted: usize,
    /// Sends the transport accepted.
    pub delivered: usize,
    /// Sessions whose send failed.
    pub failed: Vec<ClientId>,
}

/// Bridges a [`Transport`] and application logic through per-session inboxes.
pub struct Gateway {
    config: GatewayConfig,
    registry: SessionRegistry,
    transport: Arc<dyn Transport>,
    handlers: Handlers,
    accepting: AtomicBool,
}

impl Gateway {
    /// Create a gateway sending through `transport` and delivering to
    /// `handlers`.
    pub fn new(config: GatewayConfig, transport: Arc<dyn Transport>, handlers: Handlers) -> Self {
        Self {
            registry: SessionRegistry::new(config.max_clients),
            config,
            transport,
            handlers,
            accepting: AtomicBool::new(true),
        }
    }

    /// The gateway's configuration.
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Id reported to the event handler.
    pub fn server_id(&self) -> i32 {
        self.config.server_id
    }

    /// Whether the gateway still accepts connections and work.
    pub fn is_running(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    /// Number of registered sessions, including ones awaiting removal.
    pub fn session_count(&self) -> usize {
        self.registry.len()
    }

    /// Whether `id` is registered and not awaiting removal.
    pub fn is_connected(&self, id: &ClientId) -> bool {
        self.registry
            .find(id)
            .is_some_and(|session| !session.needs_removal())
    }

    /// The [`ClientId`] assigned to a transport handle.
    pub fn client_id_for(&self, handle: ConnectionHandle) -> ClientId {
        ClientId::new(self.config.client_id_namespace, handle.0)
    }

    // --- Transport callbacks ---

    /// A new connection was accepted. Registers its session and queues a
    /// [`NetEvent::Connected`] for the next drain pass.
    ///
    /// Returns the assigned id, or `None` if the connection was refused.
    pub fn on_connected(&self, handle: ConnectionHandle) -> Option<ClientId> {
        if !self.is_running() {
            tracing::debug!("Refusing {handle}: gateway is shut down");
            self.transport.close(handle);
            return None;
        }

        let id = self.client_id_for(handle);
        let session = Session::new(id, handle);
        // Queued before publishing, so it is always the session's first event.
        session.inbox().push(InboundEvent::Connected(id));

        match self.registry.try_add(session) {
            Ok(_) => {}
            Err(RegistryError::Duplicate(id)) => {
                tracing::error!("Duplicate session {id} for {handle}, keeping the existing one");
                return None;
            }
            Err(err @ RegistryError::Full { .. }) => {
                tracing::warn!("Rejecting {handle}: {err}");
                self.transport.close(handle);
                return None;
            }
        }

        // Lost a race with shutdown: undo so the registry stays empty.
        if !self.is_running() {
            self.registry.remove(&id);
            self.transport.close(handle);
            return None;
        }

        tracing::debug!("Session {id} registered for {handle}");
        Some(id)
    }

    /// Bytes arrived on `handle`. Frames every complete message into the
    /// session's inbox and buffers any trailing partial frame.
    ///
    /// Always reports every byte as consumed; data for unknown sessions is
    /// dropped.
    pub fn on_data(&self, handle: ConnectionHandle, bytes: &[u8]) -> usize {
        let id = self.client_id_for(handle);
        let ingest = self.registry.with_session(&id, |session| {
            session.ingest(bytes, self.config.max_frame_body, self.config.max_recv_buffer)
        });

        match ingest {
            None => {
                tracing::trace!("Dropping {} late bytes for {id}", bytes.len());
            }
            Some(ingest) => {
                tracing::trace!(
                    "Session {id} received {} bytes, {} frames",
                    bytes.len(),
                    ingest.frames
                );
                match ingest.halted {
                    Some(HaltReason::Malformed(reason)) => {
                        tracing::warn!("Session {id} sent a malformed frame ({reason}), framing halted");
                    }
                    Some(HaltReason::BufferOverflow { size, max }) => {
                        tracing::warn!(
                            "Session {id} receive buffer overflow ({size} > {max}), framing halted"
                        );
                    }
                    None => {}
                }
            }
        }

        bytes.len()
    }

    /// The transport lost `handle`. Queues a [`NetEvent::Disconnected`]; the
    /// session itself is dropped by the drain pass that handles it.
    pub fn on_disconnected(&self, handle: ConnectionHandle) {
        let id = self.client_id_for(handle);
        match self.registry.find(&id) {
            Some(session) => {
                session.inbox().push(InboundEvent::Disconnected(id));
                tracing::debug!("Session {id} disconnected");
            }
            None => tracing::trace!("Ignoring disconnect for unknown session {id}"),
        }
    }

    // --- Drain pass ---

    /// Deliver every event queued before this call to the handlers, then drop
    /// sessions whose disconnect was delivered.
    ///
    /// Must only be called from one thread at a time.
    pub fn update(&self) -> UpdateStats {
        let mut stats = UpdateStats::default();
        let mut dead = Vec::new();

        for session in self.registry.snapshot() {
            stats.events += self.drain_session(&session);
            if session.needs_removal() {
                dead.push(session.id());
            }
        }

        if !dead.is_empty() {
            stats.removed = self.registry.remove_all(&dead);
            tracing::debug!("Removed {} closed sessions", stats.removed);
        }

        stats
    }

    fn drain_session(&self, session: &Session) -> usize {
        let pending = session.inbox().count();
        let mut processed = 0;

        for _ in 0..pending {
            let Some(event) = session.inbox().pop() else {
                break;
            };
            processed += 1;

            match event {
                InboundEvent::Connected(id) => {
                    self.handlers
                        .events
                        .on_event(NetEvent::Connected, id, self.config.server_id);
                }
                InboundEvent::Disconnected(id) => {
                    self.handlers
                        .events
                        .on_event(NetEvent::Disconnected, id, self.config.server_id);
                    session.set_needs_removal(true);
                }
                InboundEvent::Data { header, payload } => {
                    self.handlers
                        .messages
                        .on_message(&header, header.msg_id, &payload, session.id());
                }
            }
        }

        processed
    }

    // --- Outbound API ---

    /// Send already-framed bytes to one client.
    pub fn send_to(&self, id: ClientId, bytes: &[u8]) -> Result<(), GatewayError> {
        let handle = self
            .registry
            .find(&id)
            .filter(|session| !session.needs_removal())
            .map(|session| session.handle())
            .ok_or(GatewayError::UnknownOrClosedSession(id))?;

        self.transport.send(handle, bytes)?;
        Ok(())
    }

    /// Frame `payload` as message `msg_id` for `player_id` and send it to one
    /// client.
    pub fn send_with_header(
        &self,
        msg_id: u16,
        payload: &[u8],
        id: ClientId,
        player_id: ClientId,
    ) -> Result<(), GatewayError> {
        let frame = self.encode_frame(msg_id, payload, player_id)?;
        self.send_to(id, &frame)
    }

    /// Send already-framed bytes to every live session.
    ///
    /// A failed send to one session does not stop the others.
    pub fn broadcast(&self, bytes: &[u8]) -> BroadcastReport {
        let mut report = BroadcastReport::default();

        for session in self.registry.snapshot() {
            if session.needs_removal() {
                continue;
            }
            report.attempted += 1;
            match self.transport.send(session.handle(), bytes) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    tracing::warn!("Broadcast to {} failed: {e}", session.id());
                    report.failed.push(session.id());
                }
            }
        }

        report
    }

    /// Frame `payload` once and broadcast it to every live session.
    pub fn broadcast_with_header(
        &self,
        msg_id: u16,
        payload: &[u8],
        player_id: ClientId,
    ) -> Result<BroadcastReport, GatewayError> {
        let frame = self.encode_frame(msg_id, payload, player_id)?;
        Ok(self.broadcast(&frame))
    }

    /// Ask the transport to close a client's connection.
    ///
    /// The session stays registered until the resulting disconnect is drained.
    /// Returns whether the id was known.
    pub fn close_session(&self, id: ClientId) -> bool {
        match self.registry.find(&id) {
            Some(session) => {
                self.transport.close(session.handle());
                true
            }
            None => false,
        }
    }

    /// Stop accepting connections, close every connection and drop all
    /// sessions without delivering their pending events.
    ///
    /// Returns the number of sessions closed. Later calls do nothing.
    pub fn shutdown(&self) -> usize {
        if !self.accepting.swap(false, Ordering::AcqRel) {
            return 0;
        }

        let sessions = self.registry.clear();
        for session in &sessions {
            self.transport.close(session.handle());
        }
        tracing::info!("Gateway shut down, closed {} sessions", sessions.len());
        sessions.len()
    }

    fn encode_frame(
        &self,
        msg_id: u16,
        payload: &[u8],
        player_id: ClientId,
    ) -> Result<Vec<u8>, GatewayError> {
        if msg_id == 0 {
            return Err(GatewayError::InvalidMessageId);
        }

        let max = self.config.max_frame_body;
        let body_len = u32::try_from(payload.len())
            .ok()
            .filter(|len| *len <= max)
            .ok_or(GatewayError::PayloadTooLarge {
                size: payload.len(),
                max,
            })?;

        let header = MessageHeader::new(msg_id, player_id, body_len);
        let frame = codec::encode(&header, payload);

        let expected = payload.len() + HEADER_LEN;
        if frame.len() != expected {
            return Err(GatewayError::EncodeMismatch {
                expected,
                actual: frame.len(),
            });
        }
        Ok(frame)
    }
}
