//! Tokio-based TCP transport feeding a [`Gateway`].
//!
//! The accept loop hands every new stream a [`ConnectionHandle`], reports it
//! to the gateway, and spawns one task per connection. That task forwards
//! received bytes to [`Gateway::on_data`], writes whatever the gateway queued
//! through [`Transport::send`], and reports [`Gateway::on_disconnected`] when
//! the stream ends or is closed.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};

use crate::gateway::Gateway;
use crate::platform::{SocketConfig, configure_stream};
use crate::transport::{ConnectionHandle, IdGenerator, Transport, TransportError};

/// Size of the per-connection read buffer.
const READ_CHUNK: usize = 4096;

/// Transport-side state for one live stream.
struct Connection {
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    close: watch::Sender<bool>,
    peer_addr: SocketAddr,
}

type ConnectionMap = HashMap<ConnectionHandle, Connection>;

/// TCP [`Transport`] built on tokio.
pub struct TcpTransport {
    config: SocketConfig,
    connections: RwLock<ConnectionMap>,
    id_gen: IdGenerator,
}

impl TcpTransport {
    /// Create a transport applying `config` to every accepted stream.
    pub fn new(config: SocketConfig) -> Self {
        Self {
            config,
            connections: RwLock::new(HashMap::new()),
            id_gen: IdGenerator::new(),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, ConnectionMap> {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, ConnectionMap> {
        self.connections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of open streams.
    pub fn connection_count(&self) -> usize {
        self.read().len()
    }

    /// Remote address of a live connection.
    pub fn peer_addr(&self, handle: ConnectionHandle) -> Option<SocketAddr> {
        self.read().get(&handle).map(|conn| conn.peer_addr)
    }

    /// Run the accept loop until `shutdown` turns true.
    pub async fn serve(
        self: Arc<Self>,
        listener: TcpListener,
        gateway: Arc<Gateway>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            self.accept(stream, peer_addr, &gateway, shutdown.clone());
                        }
                        Err(e) => tracing::warn!("Accept failed: {e}"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("Transport stopped accepting");
                        break;
                    }
                }
            }
        }
    }

    fn accept(
        self: &Arc<Self>,
        stream: TcpStream,
        peer_addr: SocketAddr,
        gateway: &Arc<Gateway>,
        shutdown: watch::Receiver<bool>,
    ) {
        if let Err(e) = configure_stream(&stream, &self.config) {
            tracing::warn!("Could not configure socket for {peer_addr}: {e}");
        }

        let handle = self.id_gen.next_id();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (close_tx, close_rx) = watch::channel(false);
        self.write().insert(
            handle,
            Connection {
                outbound: outbound_tx,
                close: close_tx,
                peer_addr,
            },
        );
        tracing::info!("Accepted {handle} from {peer_addr}");

        // A refused connection has already been asked to close; the task
        // below notices and cleans up.
        gateway.on_connected(handle);

        let transport = Arc::clone(self);
        let gateway = Arc::clone(gateway);
        tokio::spawn(async move {
            transport
                .run_connection(handle, stream, outbound_rx, close_rx, shutdown, &gateway)
                .await;
            let peer_addr = transport.peer_addr(handle);
            transport.write().remove(&handle);
            gateway.on_disconnected(handle);
            match peer_addr {
                Some(peer_addr) => tracing::info!("Connection {handle} from {peer_addr} closed"),
                None => tracing::info!("Connection {handle} closed"),
            }
        });
    }

    /// Per-connection read/write loop.
    async fn run_connection(
        &self,
        handle: ConnectionHandle,
        stream: TcpStream,
        mut outbound: mpsc::UnboundedReceiver<Vec<u8>>,
        mut close: watch::Receiver<bool>,
        mut shutdown: watch::Receiver<bool>,
        gateway: &Gateway,
    ) {
        let (mut reader, mut writer) = stream.into_split();
        let mut buf = [0u8; READ_CHUNK];

        loop {
            tokio::select! {
                result = reader.read(&mut buf) => {
                    match result {
                        Ok(0) => break,
                        Ok(n) => {
                            gateway.on_data(handle, &buf[..n]);
                        }
                        Err(e) => {
                            tracing::debug!("Read error on {handle}: {e}");
                            break;
                        }
                    }
                }
                Some(bytes) = outbound.recv() => {
                    if let Err(e) = writer.write_all(&bytes).await {
                        tracing::debug!("Write error on {handle}: {e}");
                        break;
                    }
                }
                changed = close.changed() => {
                    if changed.is_err() || *close.borrow() {
                        break;
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        // Flush what was queued before the close request.
        outbound.close();
        while let Ok(bytes) = outbound.try_recv() {
            if writer.write_all(&bytes).await.is_err() {
                break;
            }
        }
        let _ = writer.shutdown().await;
    }
}

impl Transport for TcpTransport {
    fn send(&self, handle: ConnectionHandle, bytes: &[u8]) -> Result<(), TransportError> {
        let connections = self.read();
        let conn = connections
            .get(&handle)
            .ok_or(TransportError::UnknownHandle(handle))?;
        if *conn.close.borrow() {
            return Err(TransportError::Closed(handle));
        }
        conn.outbound
            .send(bytes.to_vec())
            .map_err(|_| TransportError::Closed(handle))
    }

    fn close(&self, handle: ConnectionHandle) {
        if let Some(conn) = self.read().get(&handle) {
            conn.close.send_replace(true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use crate::codec::{ClientId, DEFAULT_MAX_BODY, HEADER_LEN, MessageHeader, decode, encode};
    use crate::gateway::{GatewayConfig, Handlers, NetEvent};
    use crate::platform::create_listener;

    type Log = Arc<Mutex<Vec<String>>>;

    /// Start a transport + gateway on an ephemeral port.
    async fn start_test_server(
        config: GatewayConfig,
    ) -> (SocketAddr, Arc<Gateway>, Arc<TcpTransport>, Log, watch::Sender<bool>) {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let msg_log = Arc::clone(&log);
        let event_log = Arc::clone(&log);
        let handlers = Handlers::new(
            move |_: &MessageHeader, msg_id: u16, payload: &[u8], client: ClientId| {
                msg_log.lock().unwrap().push(format!(
                    "msg {msg_id} {} from {client}",
                    String::from_utf8_lossy(payload)
                ));
            },
            move |event: NetEvent, client: ClientId, _: i32| {
                event_log.lock().unwrap().push(format!("{event:?} {client}"));
            },
        );

        let transport = Arc::new(TcpTransport::new(SocketConfig::default()));
        let gateway = Arc::new(Gateway::new(
            config,
            Arc::clone(&transport) as Arc<dyn Transport>,
            handlers,
        ));
        let listener = create_listener("127.0.0.1:0".parse().unwrap(), &SocketConfig::default())
            .unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(Arc::clone(&transport).serve(listener, Arc::clone(&gateway), shutdown_rx));

        (addr, gateway, transport, log, shutdown_tx)
    }

    /// Run drain passes until `log` holds `n` entries or a second passes.
    async fn pump_until(gateway: &Gateway, log: &Log, n: usize) {
        for _ in 0..100 {
            gateway.update();
            if log.lock().unwrap().len() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    fn frame(msg_id: u16, body: &[u8]) -> Vec<u8> {
        encode(
            &MessageHeader::new(msg_id, ClientId::NIL, body.len() as u32),
            body,
        )
    }

    #[tokio::test]
    async fn test_connect_data_and_disconnect_reach_handlers() {
        let (addr, gateway, transport, log, _shutdown) =
            start_test_server(GatewayConfig::default()).await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        let client_addr = client.local_addr().unwrap();
        let mut bytes = frame(1, b"hello");
        bytes.extend(frame(2, b"world"));
        // Split mid-header to exercise partial buffering.
        client.write_all(&bytes[..10]).await.unwrap();
        client.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        client.write_all(&bytes[10..]).await.unwrap();

        pump_until(&gateway, &log, 3).await;
        assert_eq!(transport.peer_addr(ConnectionHandle(1)), Some(client_addr));
        drop(client);
        pump_until(&gateway, &log, 4).await;
        assert_eq!(transport.peer_addr(ConnectionHandle(1)), None);

        let log = log.lock().unwrap().clone();
        assert_eq!(log.len(), 4, "unexpected log: {log:?}");
        assert!(log[0].starts_with("Connected"));
        assert!(log[1].starts_with("msg 1 hello"));
        assert!(log[2].starts_with("msg 2 world"));
        assert!(log[3].starts_with("Disconnected"));
        assert_eq!(gateway.session_count(), 0);
    }

    #[tokio::test]
    async fn test_send_with_header_reaches_client() {
        let (addr, gateway, _transport, log, _shutdown) =
            start_test_server(GatewayConfig::default()).await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        pump_until(&gateway, &log, 1).await;
        let id = ClientId::new(0, 1);

        gateway
            .send_with_header(9, b"pong", id, ClientId::new(4, 2))
            .unwrap();

        let mut buf = vec![0u8; HEADER_LEN + 4];
        tokio::time::timeout(Duration::from_secs(2), client.read_exact(&mut buf))
            .await
            .expect("client should receive the frame")
            .unwrap();
        let (header, body_len) = decode(&buf, DEFAULT_MAX_BODY).unwrap();
        assert_eq!(header.msg_id, 9);
        assert_eq!(header.player_id, ClientId::new(4, 2));
        assert_eq!(&buf[HEADER_LEN..HEADER_LEN + body_len], b"pong");
    }

    #[tokio::test]
    async fn test_close_session_closes_socket() {
        let (addr, gateway, transport, log, _shutdown) =
            start_test_server(GatewayConfig::default()).await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        pump_until(&gateway, &log, 1).await;

        assert!(gateway.close_session(ClientId::new(0, 1)));
        let mut buf = [0u8; 16];
        let n = tokio::time::timeout(Duration::from_secs(2), client.read(&mut buf))
            .await
            .expect("socket should close")
            .unwrap();
        assert_eq!(n, 0, "Client should receive EOF after close");

        pump_until(&gateway, &log, 2).await;
        assert_eq!(gateway.session_count(), 0);
        assert_eq!(transport.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_max_clients_enforced() {
        let (addr, gateway, _transport, log, _shutdown) = start_test_server(GatewayConfig {
            max_clients: 2,
            ..Default::default()
        })
        .await;

        let _c1 = TcpStream::connect(addr).await.unwrap();
        let _c2 = TcpStream::connect(addr).await.unwrap();
        pump_until(&gateway, &log, 2).await;

        let mut c3 = TcpStream::connect(addr).await.unwrap();
        let mut buf = [0u8; 16];
        let n = tokio::time::timeout(Duration::from_secs(2), c3.read(&mut buf))
            .await
            .expect("rejected client should be closed")
            .unwrap();
        assert_eq!(n, 0);
        assert_eq!(gateway.session_count(), 2);
    }

    #[tokio::test]
    async fn test_shutdown_signal_closes_connections() {
        let (addr, gateway, transport, log, shutdown) =
            start_test_server(GatewayConfig::default()).await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        pump_until(&gateway, &log, 1).await;

        gateway.shutdown();
        shutdown.send(true).unwrap();

        let mut buf = [0u8; 16];
        let n = tokio::time::timeout(Duration::from_secs(2), client.read(&mut buf))
            .await
            .expect("socket should close on shutdown")
            .unwrap();
        assert_eq!(n, 0, "Client should receive EOF after server shutdown");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(transport.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_send_to_unknown_handle_fails() {
        let transport = TcpTransport::new(SocketConfig::default());
        assert!(matches!(
            transport.send(ConnectionHandle(77), b"x"),
            Err(TransportError::UnknownHandle(ConnectionHandle(77)))
        ));
    }
}
