//! Ready-to-run gateway server: a tokio runtime, a [`TcpTransport`] and a
//! [`Gateway`] wired together.
//!
//! The runtime's worker threads do all socket I/O. The owner of the
//! [`NetServer`] calls [`NetServer::update`] from its own logic loop to
//! receive events, and sends through [`NetServer::gateway`].

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::runtime::{Handle, Runtime};
use tokio::sync::watch;

use crate::addr::{AddrError, resolve_bind_addr};
use crate::gateway::{Gateway, GatewayConfig, Handlers, UpdateStats};
use crate::platform::{SocketConfig, create_listener};
use crate::tcp_transport::TcpTransport;
use crate::transport::Transport;

/// Configuration for [`NetServer`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// `host:port` to listen on. Default: `0.0.0.0:7777`.
    pub bind_addr: String,
    /// Socket I/O worker threads. Default: 4.
    pub thread_count: usize,
    /// Session and framing limits.
    pub gateway: GatewayConfig,
    /// Socket options.
    pub socket: SocketConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:7777".to_string(),
            thread_count: 4,
            gateway: GatewayConfig::default(),
            socket: SocketConfig::default(),
        }
    }
}

/// Errors that can occur while starting a [`NetServer`].
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The bind address could not be parsed or resolved.
    #[error("invalid bind address: {0}")]
    Addr(#[from] AddrError),

    /// The runtime could not be built or the listener could not bind.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A listening gateway with its own I/O runtime.
pub struct NetServer {
    runtime: Option<Runtime>,
    gateway: Arc<Gateway>,
    transport: Arc<TcpTransport>,
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
}

impl NetServer {
    /// Bind `config.bind_addr` and start accepting connections on
    /// `config.thread_count` I/O threads.
    ///
    /// Must not be called from inside another tokio runtime.
    pub fn start(config: ServerConfig, handlers: Handlers) -> Result<Self, ServerError> {
        let addr = resolve_bind_addr(&config.bind_addr)?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(config.thread_count.max(1))
            .thread_name("tidegate-io")
            .enable_all()
            .build()?;

        let listener = {
            let _guard = runtime.enter();
            create_listener(addr, &config.socket)?
        };
        let local_addr = listener.local_addr()?;

        let server_id = config.gateway.server_id;
        let transport = Arc::new(TcpTransport::new(config.socket));
        let gateway = Arc::new(Gateway::new(
            config.gateway,
            Arc::clone(&transport) as Arc<dyn Transport>,
            handlers,
        ));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        runtime.spawn(Arc::clone(&transport).serve(listener, Arc::clone(&gateway), shutdown_rx));

        tracing::info!(
            "Server {server_id} listening on {local_addr} with {} I/O threads",
            config.thread_count.max(1)
        );

        Ok(Self {
            runtime: Some(runtime),
            gateway,
            transport,
            local_addr,
            shutdown_tx,
        })
    }

    /// Run one drain pass on the calling thread.
    pub fn update(&self) -> UpdateStats {
        self.gateway.update()
    }

    /// The gateway, for sending and inspection.
    pub fn gateway(&self) -> &Arc<Gateway> {
        &self.gateway
    }

    /// The address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of open TCP streams, including ones the gateway refused and is
    /// still closing.
    pub fn connection_count(&self) -> usize {
        self.transport.connection_count()
    }

    /// Handle to the I/O runtime, for spawning auxiliary tasks. `None` after
    /// shutdown.
    pub fn runtime_handle(&self) -> Option<Handle> {
        self.runtime.as_ref().map(|rt| rt.handle().clone())
    }

    /// Stop accepting, close every session and stop the I/O runtime.
    ///
    /// Safe to call more than once.
    pub fn shutdown(&mut self) {
        let Some(runtime) = self.runtime.take() else {
            return;
        };

        self.gateway.shutdown();
        self.shutdown_tx.send_replace(true);
        runtime.shutdown_background();
        tracing::info!("Server on {} stopped", self.local_addr);
    }
}

impl Drop for NetServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
