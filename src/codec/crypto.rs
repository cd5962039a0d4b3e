//! LISP data-plane crypto primitives
//!
//! Encrypted LISP data packets carry an 8-byte IV after the header, an
//! AES-GCM ciphertext with its 16-byte tag, and a trailing 20-byte ICV
//! (HMAC-SHA256 truncated) computed over everything before it.

use aes::{Aes128, Aes256};
use aes_gcm::aead::consts::{U16, U8};
use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::{AesGcm, Nonce, Tag};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

/// IV length carried after the LISP header
pub const IV_LEN: usize = 8;

/// AES-GCM authentication tag length
pub const GCM_TAG_LEN: usize = 16;

/// Integrity check value length (truncated HMAC-SHA256)
pub const ICV_LEN: usize = 20;

type HmacSha256 = Hmac<Sha256>;
type Aes128Gcm8 = AesGcm<Aes128, U8>;
type Aes256Gcm8 = AesGcm<Aes256, U8>;

/// AES-GCM cipher keyed for one decapsulation key slot.
///
/// Built once when keys are installed and reused for every packet.
#[derive(Clone)]
pub enum DecapCipher {
    Aes128(Aes128Gcm8),
    Aes256(Aes256Gcm8),
}

impl DecapCipher {
    /// Create a cipher from raw key bytes (16 or 32 bytes).
    ///
    /// Returns `None` for any other key length.
    #[must_use]
    pub fn new(key: &[u8]) -> Option<Self> {
        match key.len() {
            16 => Aes128Gcm8::new_from_slice(key).ok().map(Self::Aes128),
            32 => Aes256Gcm8::new_from_slice(key).ok().map(Self::Aes256),
            _ => None,
        }
    }

    /// Key size in bits
    #[must_use]
    pub const fn key_bits(&self) -> u16 {
        match self {
            Self::Aes128(_) => 128,
            Self::Aes256(_) => 256,
        }
    }

    /// Decrypt `buf` (ciphertext followed by the GCM tag) in place.
    ///
    /// On success the first `buf.len() - GCM_TAG_LEN` bytes hold the plaintext
    /// and that length is returned.
    ///
    /// # Errors
    ///
    /// Returns `aes_gcm::Error` when the buffer cannot hold a tag or the tag
    /// does not verify.
    pub fn open_in_place(&self, iv: &[u8; IV_LEN], buf: &mut [u8]) -> Result<usize, aes_gcm::Error> {
        if buf.len() < GCM_TAG_LEN {
            return Err(aes_gcm::Error);
        }
        let plaintext_len = buf.len() - GCM_TAG_LEN;
        let (ciphertext, tag) = buf.split_at_mut(plaintext_len);
        let nonce = Nonce::<U8>::from_slice(iv);
        let tag = Tag::<U16>::clone_from_slice(tag);

        match self {
            Self::Aes128(cipher) => cipher.decrypt_in_place_detached(nonce, &[], ciphertext, &tag),
            Self::Aes256(cipher) => cipher.decrypt_in_place_detached(nonce, &[], ciphertext, &tag),
        }?;

        Ok(plaintext_len)
    }

    /// Encrypt `buf` in place and append the GCM tag.
    ///
    /// This is the sealing half used by encapsulating peers; the ETR itself
    /// only opens packets.
    ///
    /// # Errors
    ///
    /// Returns `aes_gcm::Error` if encryption fails.
    pub fn seal_in_place(&self, iv: &[u8; IV_LEN], buf: &mut Vec<u8>) -> Result<(), aes_gcm::Error> {
        let nonce = Nonce::<U8>::from_slice(iv);
        let tag = match self {
            Self::Aes128(cipher) => cipher.encrypt_in_place_detached(nonce, &[], buf),
            Self::Aes256(cipher) => cipher.encrypt_in_place_detached(nonce, &[], buf),
        }?;
        buf.extend_from_slice(&tag);
        Ok(())
    }
}

impl std::fmt::Debug for DecapCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DecapCipher(AES-{}-GCM)", self.key_bits())
    }
}

/// Compute the ICV of `data` with `key`.
///
/// Returns `None` if the key is rejected by the MAC.
#[must_use]
pub fn compute_icv(data: &[u8], key: &[u8]) -> Option<[u8; ICV_LEN]> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key).ok()?;
    mac.update(data);
    let digest = mac.finalize().into_bytes();

    let mut icv = [0u8; ICV_LEN];
    icv.copy_from_slice(&digest[..ICV_LEN]);
    Some(icv)
}

/// Verify a received ICV in constant time.
#[must_use]
pub fn verify_icv(data: &[u8], key: &[u8], received: &[u8]) -> bool {
    if received.len() != ICV_LEN {
        return false;
    }
    let Some(expected) = compute_icv(data, key) else {
        return false;
    };
    expected[..].ct_eq(received).into()
}
