//! Local IPv4 address discovery

use std::net::{IpAddr, Ipv4Addr};

use tracing::warn;

/// Best non-loopback IPv4 address of this host, or `127.0.0.1` if none
pub fn local_ipv4() -> Ipv4Addr {
    let interfaces = match if_addrs::get_if_addrs() {
        Ok(interfaces) => interfaces,
        Err(e) => {
            warn!("Failed to enumerate network interfaces: {}", e);
            return Ipv4Addr::LOCALHOST;
        }
    };

    let candidates: Vec<Ipv4Addr> = interfaces
        .iter()
        .filter(|iface| !iface.is_loopback())
        .filter_map(|iface| match iface.ip() {
            IpAddr::V4(addr) => Some(addr),
            IpAddr::V6(_) => None,
        })
        .collect();

    select_ipv4(&candidates).unwrap_or(Ipv4Addr::LOCALHOST)
}

/// Prefer a routable address, then any non-loopback one
pub fn select_ipv4(candidates: &[Ipv4Addr]) -> Option<Ipv4Addr> {
    candidates
        .iter()
        .find(|addr| !addr.is_loopback() && !addr.is_link_local())
        .or_else(|| candidates.iter().find(|addr| !addr.is_loopback()))
        .copied()
}
