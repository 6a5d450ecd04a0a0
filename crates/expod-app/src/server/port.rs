//! Port selection and binding for dev servers
//!
//! An explicitly requested port must be free. Otherwise ports are tried
//! upward from the kind's default and the first one that binds is kept, so
//! the listener is never lost between probing and serving.

use std::io::ErrorKind;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use expod_core::prelude::*;
use tokio::net::TcpListener;

/// Environment variable that pins the native bundler port
pub const METRO_PORT_ENV: &str = "RCT_METRO_PORT";

/// What to bind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRequest {
    /// Port that must be used as-is
    pub requested: Option<u16>,
    /// First port to try when nothing is requested
    pub default: u16,
    /// Ports above `default` to try
    pub probe_range: u16,
}

/// The port that was bound
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortChoice {
    pub port: u16,
    /// True when `default` was busy and a higher port was used
    pub fallback: bool,
}

/// Interface to bind: loopback for localhost servers, all interfaces otherwise
pub fn bind_host(localhost_only: bool) -> IpAddr {
    if localhost_only {
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    } else {
        IpAddr::V4(Ipv4Addr::UNSPECIFIED)
    }
}

/// `RCT_METRO_PORT` if set to a valid port
pub fn metro_port_override() -> Option<u16> {
    let value = std::env::var(METRO_PORT_ENV).ok()?;
    match value.trim().parse::<u16>() {
        Ok(port) if port > 0 => Some(port),
        _ => {
            warn!("Ignoring invalid {}={:?}", METRO_PORT_ENV, value);
            None
        }
    }
}

/// Bind a listener according to `request`
pub async fn bind_port(host: IpAddr, request: PortRequest) -> Result<(TcpListener, PortChoice)> {
    if let Some(port) = request.requested {
        let listener = TcpListener::bind(SocketAddr::new(host, port))
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::AddrInUse => Error::PortInUse { port },
                _ => Error::Io(e),
            })?;
        let port = listener.local_addr()?.port();
        return Ok((
            listener,
            PortChoice {
                port,
                fallback: false,
            },
        ));
    }

    let last = request.default.saturating_add(request.probe_range);
    for port in request.default..=last {
        match TcpListener::bind(SocketAddr::new(host, port)).await {
            Ok(listener) => {
                let fallback = port != request.default;
                if fallback {
                    debug!("Port {} is busy, using {}", request.default, port);
                }
                // Port 0 asks the OS for any free port
                let port = listener.local_addr()?.port();
                return Ok((listener, PortChoice { port, fallback }));
            }
            Err(e) if e.kind() == ErrorKind::AddrInUse => continue,
            Err(e) => return Err(Error::Io(e)),
        }
    }

    Err(Error::PortInUse {
        port: request.default,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const LOOPBACK: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    async fn free_port() -> u16 {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn test_requested_port_in_use() {
        let held = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let port = held.local_addr().unwrap().port();

        let err = bind_port(
            LOOPBACK,
            PortRequest {
                requested: Some(port),
                default: 8081,
                probe_range: 20,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::PortInUse { port: p } if p == port));
        assert!(err.is_usage());
    }

    #[tokio::test]
    async fn test_probe_skips_busy_default() {
        let held = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let busy = held.local_addr().unwrap().port();
        if busy == u16::MAX {
            return;
        }

        let (listener, choice) = bind_port(
            LOOPBACK,
            PortRequest {
                requested: None,
                default: busy,
                probe_range: 20,
            },
        )
        .await
        .unwrap();

        assert!(choice.fallback);
        assert!(choice.port > busy);
        assert_eq!(listener.local_addr().unwrap().port(), choice.port);
    }

    #[tokio::test]
    async fn test_probe_uses_free_default() {
        let port = free_port().await;
        let (_listener, choice) = bind_port(
            LOOPBACK,
            PortRequest {
                requested: None,
                default: port,
                probe_range: 0,
            },
        )
        .await
        .unwrap();
        assert_eq!(choice, PortChoice { port, fallback: false });
    }

    #[tokio::test]
    async fn test_probe_range_exhausted() {
        let held = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let busy = held.local_addr().unwrap().port();

        let err = bind_port(
            LOOPBACK,
            PortRequest {
                requested: None,
                default: busy,
                probe_range: 0,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::PortInUse { .. }));
    }

    #[test]
    #[serial]
    fn test_metro_port_override() {
        std::env::set_var(METRO_PORT_ENV, "8090");
        assert_eq!(metro_port_override(), Some(8090));
        std::env::set_var(METRO_PORT_ENV, "abc");
        assert_eq!(metro_port_override(), None);
        std::env::remove_var(METRO_PORT_ENV);
        assert_eq!(metro_port_override(), None);
    }

    #[test]
    fn test_bind_host() {
        assert_eq!(bind_host(true), LOOPBACK);
        assert!(bind_host(false).is_unspecified());
    }
}
