//! Host metadata reported at registration.

use std::net::{IpAddr, UdpSocket};

/// Primary non-loopback IPv4 address, or empty when none is found.
///
/// Connecting a UDP socket only selects a route; no packet is sent.
pub fn detect_primary_ip() -> String {
    let routed = UdpSocket::bind("0.0.0.0:0")
        .and_then(|socket| {
            socket.connect("8.8.8.8:80")?;
            socket.local_addr()
        })
        .ok()
        .map(|addr| addr.ip());

    match routed {
        Some(IpAddr::V4(ip)) if !ip.is_loopback() && !ip.is_unspecified() => ip.to_string(),
        _ => String::new(),
    }
}

pub fn detect_hostname() -> String {
    ["/proc/sys/kernel/hostname", "/etc/hostname"]
        .iter()
        .filter_map(|path| std::fs::read_to_string(path).ok())
        .map(|name| name.trim().to_string())
        .find(|name| !name.is_empty())
        .or_else(|| std::env::var("HOSTNAME").ok().filter(|h| !h.is_empty()))
        .unwrap_or_default()
}
