//! `host:port` parsing for listen addresses.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, ToSocketAddrs};

/// Errors from [`split_host_port`] and [`resolve_bind_addr`].
#[derive(Debug, thiserror::Error)]
pub enum AddrError {
    /// The address string was empty.
    #[error("empty address")]
    Empty,

    /// No `:` separated host and port, or nothing followed it.
    #[error("missing port in {0:?}")]
    MissingPort(String),

    /// The text after the last `:` is not a port number.
    #[error("invalid port {0:?}")]
    InvalidPort(String),

    /// A host started with `[` without a closing `]`.
    #[error("unbalanced brackets in host {0:?}")]
    UnbalancedBracket(String),

    /// The host did not resolve to any address.
    #[error("could not resolve {host:?}: {source}")]
    Resolve {
        /// Host that failed.
        host: String,
        /// Resolver error.
        #[source]
        source: std::io::Error,
    },
}

/// Split `host:port` at the last `:`.
///
/// Accepts `[v6addr]:port` and, for compatibility, `v6addr]:port` with only a
/// trailing bracket. The host may be empty (`":7777"`).
pub fn split_host_port(addr: &str) -> Result<(String, u16), AddrError> {
    if addr.is_empty() {
        return Err(AddrError::Empty);
    }

    let index = addr
        .rfind(':')
        .ok_or_else(|| AddrError::MissingPort(addr.to_string()))?;
    if index == addr.len() - 1 {
        return Err(AddrError::MissingPort(addr.to_string()));
    }

    let port_str = &addr[index + 1..];
    let port = port_str
        .parse::<u16>()
        .map_err(|_| AddrError::InvalidPort(port_str.to_string()))?;

    let mut host = &addr[..index];
    if let Some(inner) = host.strip_prefix('[') {
        host = inner
            .strip_suffix(']')
            .ok_or_else(|| AddrError::UnbalancedBracket(host.to_string()))?;
    } else if let Some(inner) = host.strip_suffix(']') {
        // "fe80::886a:49f3:20f3:add2]:80"
        host = inner;
    }

    Ok((host.to_string(), port))
}

/// Parse `addr` and resolve it to a socket address to bind.
///
/// An empty host binds every IPv4 interface.
pub fn resolve_bind_addr(addr: &str) -> Result<SocketAddr, AddrError> {
    let (host, port) = split_host_port(addr)?;

    if host.is_empty() {
        return Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port));
    }
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }

    let resolve_err = |source| AddrError::Resolve {
        host: host.clone(),
        source,
    };
    (host.as_str(), port)
        .to_socket_addrs()
        .map_err(resolve_err)?
        .next()
        .ok_or_else(|| {
            resolve_err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no addresses",
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ipv4_host_port() {
        let (host, port) = split_host_port("127.0.0.1:8080").unwrap();
        assert_eq!(host, "127.0.0.1");
        assert_eq!(port, 8080);
    }

    #[test]
    fn test_bracketed_ipv6() {
        let (host, port) = split_host_port("[::1]:8080").unwrap();
        assert_eq!(host, "::1");
        assert_eq!(port, 8080);
    }

    #[test]
    fn test_trailing_bracket_only_ipv6() {
        let (host, port) = split_host_port("fe80::1]:80").unwrap();
        assert_eq!(host, "fe80::1");
        assert_eq!(port, 80);
    }

    #[test]
    fn test_rejected_inputs() {
        assert!(matches!(split_host_port(""), Err(AddrError::Empty)));
        assert!(matches!(
            split_host_port("noport"),
            Err(AddrError::MissingPort(_))
        ));
        assert!(matches!(
            split_host_port("host:"),
            Err(AddrError::MissingPort(_))
        ));
        assert!(matches!(
            split_host_port("host:http"),
            Err(AddrError::InvalidPort(_))
        ));
        assert!(matches!(
            split_host_port("[::1:80"),
            Err(AddrError::UnbalancedBracket(_))
        ));
    }

    #[test]
    fn test_empty_host_binds_all_interfaces() {
        let (host, port) = split_host_port(":7777").unwrap();
        assert!(host.is_empty());
        assert_eq!(port, 7777);

        let addr = resolve_bind_addr(":7777").unwrap();
        assert_eq!(addr, "0.0.0.0:7777".parse().unwrap());
    }

    #[test]
    fn test_resolve_literal_addresses() {
        assert_eq!(
            resolve_bind_addr("127.0.0.1:9000").unwrap(),
            "127.0.0.1:9000".parse().unwrap()
        );
        assert_eq!(
            resolve_bind_addr("[::1]:9000").unwrap(),
            "[::1]:9000".parse().unwrap()
        );
    }

    #[test]
    fn test_resolve_localhost_name() {
        let addr = resolve_bind_addr("localhost:9000").unwrap();
        assert!(addr.ip().is_loopback());
        assert_eq!(addr.port(), 9000);
    }
}
