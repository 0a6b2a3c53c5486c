//! TCP session gateway: frame codec, per-session inboxes, the session registry,
//! and the drain pass that hands received messages to game logic.

pub mod addr;
pub mod codec;
pub mod gateway;
pub mod inbox;
pub mod platform;
pub mod registry;
pub mod server;
pub mod session;
pub mod tcp_transport;
pub mod transport;

pub use addr::{AddrError, resolve_bind_addr, split_host_port};
pub use codec::{
    ClientId, DEFAULT_MAX_BODY, DecodeError, HEADER_LEN, MalformedReason, MessageHeader, decode,
    dismantle, encode,
};
pub use gateway::{
    BroadcastReport, EventHandler, Gateway, GatewayConfig, GatewayError, Handlers, MessageHandler,
    NetEvent, UpdateStats,
};
pub use inbox::{InboundEvent, Inbox};
pub use platform::SocketConfig;
pub use registry::{RegistryError, SessionRegistry};
pub use server::{NetServer, ServerConfig, ServerError};
pub use session::Session;
pub use tcp_transport::TcpTransport;
pub use transport::{ConnectionHandle, Transport, TransportError};
