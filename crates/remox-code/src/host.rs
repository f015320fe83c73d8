//! Advertised-host selection for the distribution server
//!
//! The server binds every interface but must advertise one host remote
//! loaders can actually reach. Selection order: explicit override, the
//! `REMOX_SERVER_HOSTNAME` environment variable, the primary non-loopback
//! interface address, OS hostname variables, and finally loopback.

use std::net::{IpAddr, UdpSocket};
use tracing::debug;

/// Environment variable overriding the advertised host
pub const HOSTNAME_ENV: &str = "REMOX_SERVER_HOSTNAME";

/// Picks the host to advertise in code base URLs
pub fn advertised_host(override_host: Option<&str>) -> String {
    if let Some(host) = override_host {
        if !host.is_empty() {
            return host.to_string();
        }
    }
    if let Ok(host) = std::env::var(HOSTNAME_ENV) {
        if !host.is_empty() {
            debug!(host = %host, "Advertising host from {}", HOSTNAME_ENV);
            return host;
        }
    }
    if let Some(address) = primary_interface_address() {
        return address.to_string();
    }
    for variable in ["HOSTNAME", "COMPUTERNAME"] {
        if let Ok(host) = std::env::var(variable) {
            if !host.is_empty() {
                return host;
            }
        }
    }
    "127.0.0.1".to_string()
}

/// Address of the interface the OS would route external traffic through.
///
/// The socket is never written to; connecting a datagram socket only asks
/// the routing table which local address would be used.
fn primary_interface_address() -> Option<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("198.51.100.1:9").ok()?;
    let address = socket.local_addr().ok()?.ip();
    if address.is_loopback() || address.is_unspecified() {
        None
    } else {
        Some(address)
    }
}
