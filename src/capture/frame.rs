//! Outer frame decoding for captured packets
//!
//! Captured frames are Ethernet II, optionally with one 802.1Q tag, carrying
//! IPv4 or IPv6 and then UDP. Only the UDP payload location, the outer source
//! address and the IPv4 header checksum result are needed by the dataplane.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::ops::Range;

const ETH_HEADER_LEN: usize = 14;
const VLAN_TAG_LEN: usize = 4;
const ETHERTYPE_IPV4: u16 = 0x0800;
const ETHERTYPE_IPV6: u16 = 0x86dd;
const ETHERTYPE_VLAN: u16 = 0x8100;

const IPV4_MIN_HEADER_LEN: usize = 20;
const IPV6_HEADER_LEN: usize = 40;
const UDP_HEADER_LEN: usize = 8;
const IPPROTO_UDP: u8 = 17;

/// Location of a UDP payload inside a captured frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedDatagram {
    /// Outer source address (the sending RLOC)
    pub src: IpAddr,
    /// Byte range of the UDP payload within the frame
    pub payload: Range<usize>,
    /// IPv4 header checksum verified, always true for IPv6
    pub checksum_ok: bool,
}

/// Frame decode result that is not a usable datagram
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// Neither a valid IPv4 nor IPv6 header follows the link header
    NotIp,
}

/// Locate the UDP payload in an Ethernet frame.
///
/// Returns `Ok(None)` for IP packets that carry no UDP payload (other
/// protocols, truncated UDP, empty payload); those are skipped silently.
///
/// # Errors
///
/// Returns `FrameError::NotIp` when no IP header can be decoded.
pub fn locate_udp_payload(frame: &[u8]) -> Result<Option<CapturedDatagram>, FrameError> {
    let (ethertype, l3) = link_header(frame).ok_or(FrameError::NotIp)?;

    let (src, proto, l4, end, checksum_ok) = match ethertype {
        ETHERTYPE_IPV4 => {
            let ip = frame.get(l3..).ok_or(FrameError::NotIp)?;
            if ip.len() < IPV4_MIN_HEADER_LEN || ip[0] >> 4 != 4 {
                return Err(FrameError::NotIp);
            }
            let ihl = usize::from(ip[0] & 0x0f) * 4;
            if ihl < IPV4_MIN_HEADER_LEN || ip.len() < ihl {
                return Err(FrameError::NotIp);
            }
            let total = usize::from(u16::from_be_bytes([ip[2], ip[3]]));
            // Trailing link padding is not part of the packet
            let end = l3 + total.clamp(ihl, ip.len());
            let src = Ipv4Addr::new(ip[12], ip[13], ip[14], ip[15]);
            let checksum_ok = ipv4_checksum_ok(&ip[..ihl]);
            (IpAddr::V4(src), ip[9], l3 + ihl, end, checksum_ok)
        }
        ETHERTYPE_IPV6 => {
            let ip = frame.get(l3..).ok_or(FrameError::NotIp)?;
            if ip.len() < IPV6_HEADER_LEN || ip[0] >> 4 != 6 {
                return Err(FrameError::NotIp);
            }
            let payload_len = usize::from(u16::from_be_bytes([ip[4], ip[5]]));
            let end = l3 + (IPV6_HEADER_LEN + payload_len).min(ip.len());
            let mut src = [0u8; 16];
            src.copy_from_slice(&ip[8..24]);
            (
                IpAddr::V6(Ipv6Addr::from(src)),
                ip[6],
                l3 + IPV6_HEADER_LEN,
                end,
                true,
            )
        }
        _ => return Err(FrameError::NotIp),
    };

    if proto != IPPROTO_UDP || end < l4 + UDP_HEADER_LEN {
        return Ok(None);
    }
    let udp = &frame[l4..end];
    let udp_len = usize::from(u16::from_be_bytes([udp[4], udp[5]]));
    let payload_end = if udp_len >= UDP_HEADER_LEN {
        (l4 + udp_len).min(end)
    } else {
        end
    };
    let payload = l4 + UDP_HEADER_LEN..payload_end;
    if payload.is_empty() {
        return Ok(None);
    }

    Ok(Some(CapturedDatagram {
        src,
        payload,
        checksum_ok,
    }))
}

/// Ethertype and network-layer offset, skipping one VLAN tag
fn link_header(frame: &[u8]) -> Option<(u16, usize)> {
    let ethertype = u16::from_be_bytes([*frame.get(12)?, *frame.get(13)?]);
    if ethertype != ETHERTYPE_VLAN {
        return Some((ethertype, ETH_HEADER_LEN));
    }
    let inner = u16::from_be_bytes([*frame.get(16)?, *frame.get(17)?]);
    Some((inner, ETH_HEADER_LEN + VLAN_TAG_LEN))
}

/// One's complement sum over an IPv4 header must fold to `0xFFFF`
#[must_use]
pub fn ipv4_checksum_ok(header: &[u8]) -> bool {
    if header.len() % 2 != 0 {
        return false;
    }
    let mut sum: u32 = header
        .chunks_exact(2)
        .map(|w| u32::from(u16::from_be_bytes([w[0], w[1]])))
        .sum();
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    sum == 0xffff
}
