//! Socket options for the gateway's listener and accepted streams.
//!
//! [`SocketConfig`] gathers the per-platform knobs (TCP_NODELAY, keepalive,
//! SO_REUSEADDR, dual-stack IPv6, listen backlog) that the TCP transport
//! applies to every socket it owns.

use std::net::SocketAddr;
use std::time::Duration;

use socket2::{Domain, Protocol, SockRef, Socket, TcpKeepalive, Type};
use tokio::net::{TcpListener, TcpStream};

/// Socket options applied by [`TcpTransport`](crate::TcpTransport).
#[derive(Debug, Clone)]
pub struct SocketConfig {
    /// Disable Nagle's algorithm on accepted streams. Default: true.
    pub tcp_nodelay: bool,
    /// Enable TCP keepalive on accepted streams. Default: true.
    pub keepalive_enabled: bool,
    /// Idle time before the first keepalive probe. Default: 60s.
    pub keepalive_idle: Duration,
    /// Interval between keepalive probes. Default: 10s.
    pub keepalive_interval: Duration,
    /// Enable `SO_REUSEADDR` on the listener. Default: true except on Windows.
    pub reuse_addr: bool,
    /// Pending-connection backlog passed to `listen`. Default: 1024.
    pub backlog: i32,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            tcp_nodelay: true,
            keepalive_enabled: true,
            keepalive_idle: Duration::from_secs(60),
            keepalive_interval: Duration::from_secs(10),
            reuse_addr: !cfg!(target_os = "windows"),
            backlog: 1024,
        }
    }
}

/// Apply per-connection options to an accepted [`TcpStream`].
pub fn configure_stream(stream: &TcpStream, config: &SocketConfig) -> std::io::Result<()> {
    stream.set_nodelay(config.tcp_nodelay)?;

    if config.keepalive_enabled {
        let keepalive = TcpKeepalive::new()
            .with_time(config.keepalive_idle)
            .with_interval(config.keepalive_interval);
        SockRef::from(stream).set_tcp_keepalive(&keepalive)?;
    }

    Ok(())
}

/// Bind a non-blocking listener on `addr`.
///
/// IPv6 listeners are dual-stack so `[::]` also accepts IPv4 clients.
pub fn create_listener(addr: SocketAddr, config: &SocketConfig) -> std::io::Result<TcpListener> {
    let domain = if addr.is_ipv6() {
        Domain::IPV6
    } else {
        Domain::IPV4
    };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;

    if config.reuse_addr {
        socket.set_reuse_address(true)?;
    }
    if addr.is_ipv6() {
        socket.set_only_v6(false)?;
    }

    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(config.backlog)?;

    TcpListener::from_std(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn loopback_listener(config: &SocketConfig) -> TcpListener {
        create_listener("127.0.0.1:0".parse().unwrap(), config).unwrap()
    }

    #[tokio::test]
    async fn test_listener_binds_ephemeral_port() {
        let listener = loopback_listener(&SocketConfig::default()).await;
        assert_ne!(listener.local_addr().unwrap().port(), 0);
    }

    #[tokio::test]
    async fn test_accepted_stream_gets_nodelay_and_keepalive() {
        let config = SocketConfig::default();
        let listener = loopback_listener(&config).await;
        let addr = listener.local_addr().unwrap();

        let _client = TcpStream::connect(addr).await.unwrap();
        let (server_side, _) = listener.accept().await.unwrap();
        configure_stream(&server_side, &config).unwrap();

        assert!(server_side.nodelay().unwrap(), "TCP_NODELAY should be enabled");
        assert!(
            SockRef::from(&server_side).keepalive().unwrap(),
            "Keepalive should be enabled"
        );
    }

    #[tokio::test]
    async fn test_options_can_be_disabled() {
        let config = SocketConfig {
            tcp_nodelay: false,
            keepalive_enabled: false,
            ..Default::default()
        };
        let listener = loopback_listener(&SocketConfig::default()).await;
        let addr = listener.local_addr().unwrap();

        let client = TcpStream::connect(addr).await.unwrap();
        configure_stream(&client, &config).unwrap();
        assert!(!client.nodelay().unwrap());
    }

    #[tokio::test]
    async fn test_ipv6_listener_when_available() {
        match create_listener("[::1]:0".parse().unwrap(), &SocketConfig::default()) {
            Ok(listener) => {
                let addr = listener.local_addr().unwrap();
                assert!(TcpStream::connect(addr).await.is_ok());
            }
            Err(_) => eprintln!("IPv6 not available, skipping test"),
        }
    }
}
