//! Packet decapsulation
//!
//! [`decapsulate`] turns a received LISP data packet into either a control
//! outcome or the inner IPv6 packet plus its destination. Decryption happens
//! in place, so the returned payload borrows from the input buffer.

use std::net::Ipv6Addr;

use thiserror::Error;

use super::crypto::{verify_icv, GCM_TAG_LEN, ICV_LEN, IV_LEN};
use super::header::{LispHeader, HEADER_LEN};
use crate::keys::KeySet;
use crate::stats::DecapCounter;

/// Fixed IPv6 header length
pub const IPV6_HEADER_LEN: usize = 40;

/// Offset of the destination address in an IPv6 header
const IPV6_DST_OFFSET: usize = 24;

/// Smallest encrypted packet that can carry an IV, a GCM tag and an ICV
const MIN_ENCRYPTED_LEN: usize = HEADER_LEN + IV_LEN + GCM_TAG_LEN + ICV_LEN;

/// Reason a packet was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DropReason {
    #[error("packet shorter than LISP header")]
    HeaderTooShort,

    #[error("no decryption key for key id")]
    MissingKey,

    #[error("ICV verification failed")]
    AuthError,

    #[error("AEAD decryption failed")]
    DecryptError,

    #[error("inner packet is not IPv6")]
    BadInnerVersion,

    #[error("inner packet shorter than IPv6 header")]
    InnerTooShort,
}

impl DropReason {
    /// Counter incremented for this drop
    #[must_use]
    pub const fn counter(self) -> DecapCounter {
        match self {
            Self::HeaderTooShort => DecapCounter::HeaderError,
            Self::MissingKey => DecapCounter::NoDecryptKey,
            Self::AuthError => DecapCounter::IcvError,
            Self::DecryptError => DecapCounter::DecryptError,
            Self::BadInnerVersion => DecapCounter::BadInnerVersion,
            Self::InnerTooShort => DecapCounter::InnerHeaderError,
        }
    }
}

/// Decapsulated inner IPv6 packet
#[derive(Debug, PartialEq, Eq)]
pub struct InnerPacket<'a> {
    /// Full inner packet, IPv6 header included
    pub payload: &'a [u8],
    /// Destination address from the inner IPv6 header
    pub dest: Ipv6Addr,
}

/// Successful decapsulation result
#[derive(Debug, PartialEq, Eq)]
pub enum DecapOutcome<'a> {
    /// Control probe on the reserved instance id, nothing to forward
    Control,
    /// Data packet ready for injection
    Data(InnerPacket<'a>),
}

/// Verify, decrypt and validate a LISP data packet.
///
/// `keys` is the key set provisioned for the packet's sender, if any. When the
/// header selects a key, the trailing ICV is verified over everything before
/// it and the ciphertext between the IV and the ICV is opened in place.
///
/// # Errors
///
/// Returns the [`DropReason`] for any packet that must not be forwarded.
pub fn decapsulate<'a>(
    buf: &'a mut [u8],
    keys: Option<&KeySet>,
) -> Result<DecapOutcome<'a>, DropReason> {
    let header = LispHeader::parse(buf).ok_or(DropReason::HeaderTooShort)?;
    if header.is_control() {
        return Ok(DecapOutcome::Control);
    }

    let len = buf.len();
    let mut offset = HEADER_LEN;
    let mut overhead = 0;

    let key_id = header.key_id();
    if key_id != 0 {
        let key = keys
            .and_then(|set| set.get(key_id))
            .ok_or(DropReason::MissingKey)?;
        let (Some(icv_key), Some(cipher)) = (key.icv_key(), key.cipher()) else {
            return Err(DropReason::MissingKey);
        };

        if len < MIN_ENCRYPTED_LEN {
            return Err(DropReason::AuthError);
        }

        let icv_start = len - ICV_LEN;
        let (signed, icv) = buf.split_at(icv_start);
        if !verify_icv(signed, icv_key, icv) {
            return Err(DropReason::AuthError);
        }

        let mut iv = [0u8; IV_LEN];
        iv.copy_from_slice(&buf[HEADER_LEN..HEADER_LEN + IV_LEN]);
        offset += IV_LEN;

        cipher
            .open_in_place(&iv, &mut buf[offset..icv_start])
            .map_err(|_| DropReason::DecryptError)?;
        overhead = ICV_LEN + GCM_TAG_LEN;
    }

    let buf: &'a [u8] = buf;
    let inner = &buf[offset..len - overhead];

    match inner.first() {
        Some(b) if b >> 4 == 6 => {}
        _ => return Err(DropReason::BadInnerVersion),
    }
    if inner.len() < IPV6_HEADER_LEN {
        return Err(DropReason::InnerTooShort);
    }

    let mut dest = [0u8; 16];
    dest.copy_from_slice(&inner[IPV6_DST_OFFSET..IPV6_DST_OFFSET + 16]);

    Ok(DecapOutcome::Data(InnerPacket {
        payload: inner,
        dest: Ipv6Addr::from(dest),
    }))
}
