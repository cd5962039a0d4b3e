//! Preferred uplink source addresses
//!
//! The encapsulating side of the router needs one IPv4 and one IPv6 source
//! address. They are picked from the valid uplinks every time the uplink set
//! changes and published through an [`UplinkAddrSink`].

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::types::Uplink;

/// Receives the preferred source addresses
pub trait UplinkAddrSink: Send + Sync {
    /// Publish the current pair; `None` when no valid uplink has one
    fn set_uplink_addrs(&self, v4: Option<Ipv4Addr>, v6: Option<Ipv6Addr>);
}

/// Preferred IPv4/IPv6 source address pair
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UplinkAddrs {
    pub v4: Option<Ipv4Addr>,
    pub v6: Option<Ipv6Addr>,
}

impl UplinkAddrs {
    /// First IPv4 and first IPv6 address across valid uplinks, in list order.
    ///
    /// Link-local addresses are never picked.
    #[must_use]
    pub fn select(uplinks: &[Uplink]) -> Self {
        let mut picked = Self::default();

        let addrs = uplinks
            .iter()
            .filter(|u| u.is_valid())
            .flat_map(|u| u.addrs.iter())
            .filter(|a| !is_link_local(a));

        for addr in addrs {
            match addr {
                IpAddr::V4(v4) if picked.v4.is_none() => picked.v4 = Some(*v4),
                IpAddr::V6(v6) if picked.v6.is_none() => picked.v6 = Some(*v6),
                _ => {}
            }
            if picked.v4.is_some() && picked.v6.is_some() {
                break;
            }
        }
        picked
    }
}

fn is_link_local(addr: &IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => v4.is_link_local(),
        IpAddr::V6(v6) => (v6.segments()[0] & 0xffc0) == 0xfe80,
    }
}

/// Lock-free holder of the last published address pair
#[derive(Debug)]
pub struct PreferredAddrs {
    current: ArcSwap<UplinkAddrs>,
}

impl Default for PreferredAddrs {
    fn default() -> Self {
        Self::new()
    }
}

impl PreferredAddrs {
    /// Create with no addresses
    #[must_use]
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(UplinkAddrs::default()),
        }
    }

    /// Last published pair
    #[must_use]
    pub fn get(&self) -> UplinkAddrs {
        **self.current.load()
    }
}

impl UplinkAddrSink for PreferredAddrs {
    fn set_uplink_addrs(&self, v4: Option<Ipv4Addr>, v6: Option<Ipv6Addr>) {
        let next = UplinkAddrs { v4, v6 };
        let prev = self.current.swap(Arc::new(next));
        if *prev != next {
            info!("Preferred uplink addresses: v4 {:?}, v6 {:?}", v4, v6);
        }
    }
}
