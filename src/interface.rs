//! Enumeration of local IPv4 interfaces suitable for SSDP multicast.
use std::net::Ipv4Addr;

use anyhow::Context;
use ipnetwork::Ipv4Network;

/// A single IPv4 interface address plus its subnet prefix length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterfaceInfo {
    pub addr: Ipv4Addr,
    prefix: u8,
    mask: u32,
}

impl InterfaceInfo {
    pub fn new(addr: Ipv4Addr, prefix: u8) -> Self {
        let mask = if prefix == 0 {
            0
        } else {
            u32::MAX << (32 - prefix as u32)
        };
        Self { addr, prefix, mask }
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    /// True if `other` is this interface's own address, any multicast
    /// address, or falls within this interface's subnet.
    pub fn matches(&self, other: Ipv4Addr) -> bool {
        if other == self.addr || other.is_multicast() {
            return true;
        }
        let ours = u32::from(self.addr) & self.mask;
        let theirs = u32::from(other) & self.mask;
        ours == theirs
    }
}

/// Enumerates usable IPv4 interfaces: up, not loopback, multicast-capable.
pub fn enumerate() -> anyhow::Result<Vec<InterfaceInfo>> {
    let mut found = Vec::new();
    for iface in pnet_datalink::interfaces() {
        if !iface.is_up() || iface.is_loopback() || !iface.is_multicast() {
            continue;
        }
        for ip_network in &iface.ips {
            if let ipnetwork::IpNetwork::V4(v4) = ip_network {
                found.push(InterfaceInfo::new(v4.ip(), v4.prefix()));
            }
        }
    }
    Ok(found)
}

/// Parses a `addr/prefix` string, mainly useful in tests.
pub fn parse_cidr(s: &str) -> anyhow::Result<InterfaceInfo> {
    let net: Ipv4Network = s.parse().context("parse ipv4 cidr")?;
    Ok(InterfaceInfo::new(net.ip(), net.prefix()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_own_subnet() {
        let iface = InterfaceInfo::new(Ipv4Addr::new(192, 168, 1, 10), 24);
        assert!(iface.matches(Ipv4Addr::new(192, 168, 1, 1)));
        assert!(!iface.matches(Ipv4Addr::new(192, 168, 2, 1)));
    }

    #[test]
    fn matches_mid_byte_prefix() {
        let iface = InterfaceInfo::new(Ipv4Addr::new(10, 0, 0, 1), 22);
        assert!(iface.matches(Ipv4Addr::new(10, 0, 3, 255)));
        assert!(!iface.matches(Ipv4Addr::new(10, 0, 4, 0)));
    }

    #[test]
    fn multicast_always_matches() {
        let iface = InterfaceInfo::new(Ipv4Addr::new(10, 0, 0, 1), 24);
        assert!(iface.matches(Ipv4Addr::new(239, 255, 255, 250)));
    }

    #[test]
    fn own_address_matches() {
        let iface = InterfaceInfo::new(Ipv4Addr::new(10, 0, 0, 1), 24);
        assert!(iface.matches(Ipv4Addr::new(10, 0, 0, 1)));
    }
}
