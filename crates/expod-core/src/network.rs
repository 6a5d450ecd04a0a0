//! Host address resolution for LAN URLs

use std::net::{IpAddr, Ipv4Addr, UdpSocket};

/// Environment variable that overrides the LAN hostname advertised to devices
pub const PACKAGER_HOSTNAME_ENV: &str = "REACT_NATIVE_PACKAGER_HOSTNAME";

/// Loopback host used for `localhost` URLs
pub const LOOPBACK_HOST: &str = "127.0.0.1";

/// Resolve the hostname devices on the local network should use.
///
/// Honors `REACT_NATIVE_PACKAGER_HOSTNAME`, then the machine's primary LAN
/// IPv4 address, then loopback.
pub fn lan_hostname() -> String {
    if let Ok(host) = std::env::var(PACKAGER_HOSTNAME_ENV) {
        let host = host.trim();
        if !host.is_empty() {
            return host.to_string();
        }
    }

    match lan_ipv4() {
        Some(ip) => ip.to_string(),
        None => {
            tracing::warn!("Could not determine LAN address, falling back to loopback");
            LOOPBACK_HOST.to_string()
        }
    }
}

/// Primary LAN IPv4 address, found by asking the OS which interface routes outward.
///
/// No packets are sent: connecting a UDP socket only selects a route.
pub fn lan_ipv4() -> Option<Ipv4Addr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
    socket.connect((Ipv4Addr::new(10, 254, 254, 254), 1)).ok()?;
    match socket.local_addr().ok()?.ip() {
        IpAddr::V4(ip) if !ip.is_unspecified() && !ip.is_loopback() => Some(ip),
        _ => None,
    }
}

/// Whether `ip` is in a private (RFC 1918), link-local or loopback range
pub fn is_private_or_loopback(ip: Ipv4Addr) -> bool {
    ip.is_private() || ip.is_link_local() || ip.is_loopback()
}
