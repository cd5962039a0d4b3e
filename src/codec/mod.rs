//! LISP data packet codec
//!
//! Parses the LISP data header, verifies the ICV, opens AES-GCM ciphertext
//! in place and validates the inner IPv6 packet.
//!
//! # Packet layout
//!
//! ```text
//! cleartext:  | LISP header (8) | inner IPv6 packet |
//! encrypted:  | LISP header (8) | IV (8) | ciphertext | GCM tag (16) | ICV (20) |
//! ```
//!
//! The ICV covers everything before it. No additional authenticated data is
//! fed to AES-GCM.

mod crypto;
mod decap;
mod header;

pub use crypto::{compute_icv, verify_icv, DecapCipher, GCM_TAG_LEN, ICV_LEN, IV_LEN};
pub use decap::{decapsulate, DecapOutcome, DropReason, InnerPacket, IPV6_HEADER_LEN};
pub use header::{LispHeader, CONTROL_IID, HEADER_LEN};
