//! Decapsulation keys
//!
//! Keys are provisioned per remote RLOC by the control plane. Each RLOC has a
//! [`KeySet`] of up to three slots, selected by the 2-bit key id carried in
//! the LISP header (key id `k` uses slot `k - 1`).

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::codec::DecapCipher;

/// Highest key id that fits in the header's `KK` bits
pub const MAX_KEY_ID: u8 = 3;

/// Errors raised while installing keys
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    /// Key id outside `1..=3`
    #[error("Invalid key id {0}: must be between 1 and {MAX_KEY_ID}")]
    InvalidKeyId(u8),

    /// Decryption key is not a valid AES-128/256 key
    #[error("Invalid decryption key length {0}: expected 16 or 32 bytes")]
    InvalidKeyLength(usize),

    /// Key material was not valid hex
    #[error("Invalid key encoding: {0}")]
    Encoding(String),
}

/// One decapsulation key slot
#[derive(Debug, Clone, Default)]
pub struct DecapKey {
    icv_key: Option<Vec<u8>>,
    cipher: Option<DecapCipher>,
}

impl DecapKey {
    /// Create a slot from raw ICV and decryption key bytes.
    ///
    /// An empty ICV key leaves the slot unauthenticated, which makes every
    /// packet selecting it fail with a missing-key drop.
    ///
    /// # Errors
    ///
    /// Returns `KeyError::InvalidKeyLength` if the decryption key is not 16
    /// or 32 bytes.
    pub fn new(icv_key: &[u8], decrypt_key: &[u8]) -> Result<Self, KeyError> {
        let cipher =
            DecapCipher::new(decrypt_key).ok_or(KeyError::InvalidKeyLength(decrypt_key.len()))?;
        Ok(Self {
            icv_key: (!icv_key.is_empty()).then(|| icv_key.to_vec()),
            cipher: Some(cipher),
        })
    }

    /// Create a slot from hex-encoded key material (control-plane format)
    ///
    /// # Errors
    ///
    /// Returns `KeyError` if either key is not valid hex or the decryption key
    /// has the wrong length.
    pub fn from_hex(icv_key: &str, decrypt_key: &str) -> Result<Self, KeyError> {
        let icv = hex::decode(icv_key).map_err(|e| KeyError::Encoding(e.to_string()))?;
        let dec = hex::decode(decrypt_key).map_err(|e| KeyError::Encoding(e.to_string()))?;
        Self::new(&icv, &dec)
    }

    /// ICV (authentication) key, if set
    #[must_use]
    pub fn icv_key(&self) -> Option<&[u8]> {
        self.icv_key.as_deref()
    }

    /// Decryption cipher, if set
    #[must_use]
    pub const fn cipher(&self) -> Option<&DecapCipher> {
        self.cipher.as_ref()
    }
}

/// Hex-encoded key material for one key id, as provisioned by the control plane
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecapKeyEntry {
    pub key_id: u8,
    #[serde(default)]
    pub icv_key: String,
    pub decrypt_key: String,
}

/// All keys provisioned for one RLOC
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RlocKeys {
    pub rloc: IpAddr,
    pub keys: Vec<DecapKeyEntry>,
}

/// Ordered key slots for one remote RLOC
#[derive(Debug, Clone, Default)]
pub struct KeySet {
    slots: Vec<Option<DecapKey>>,
}

impl KeySet {
    /// Create an empty key set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a key set from hex-encoded entries
    ///
    /// # Errors
    ///
    /// Returns the first `KeyError` among the entries.
    pub fn from_entries(entries: &[DecapKeyEntry]) -> Result<Self, KeyError> {
        let mut set = Self::new();
        for entry in entries {
            let key = DecapKey::from_hex(&entry.icv_key, &entry.decrypt_key)?;
            set.insert(entry.key_id, key)?;
        }
        Ok(set)
    }

    /// Install a key in the slot for `key_id`
    ///
    /// # Errors
    ///
    /// Returns `KeyError::InvalidKeyId` unless `1 <= key_id <= 3`.
    pub fn insert(&mut self, key_id: u8, key: DecapKey) -> Result<(), KeyError> {
        if key_id == 0 || key_id > MAX_KEY_ID {
            return Err(KeyError::InvalidKeyId(key_id));
        }
        let idx = usize::from(key_id - 1);
        if self.slots.len() <= idx {
            self.slots.resize(idx + 1, None);
        }
        self.slots[idx] = Some(key);
        Ok(())
    }

    /// Builder-style [`insert`](Self::insert)
    ///
    /// # Errors
    ///
    /// See [`insert`](Self::insert).
    pub fn with_key(mut self, key_id: u8, key: DecapKey) -> Result<Self, KeyError> {
        self.insert(key_id, key)?;
        Ok(self)
    }

    /// Slot selected by a header key id, `None` for key id 0 or an empty slot
    #[must_use]
    pub fn get(&self, key_id: u8) -> Option<&DecapKey> {
        let idx = usize::from(key_id.checked_sub(1)?);
        self.slots.get(idx)?.as_ref()
    }

    /// Number of slots (including empty ones below the highest key id)
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the set has no slots at all
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Lookup of decapsulation keys by sender RLOC.
///
/// Implementations must be safe to call concurrently from every ingestion task.
pub trait KeyStore: Send + Sync {
    /// Keys for packets sent by `rloc`, `None` if not provisioned yet
    fn lookup_decap_keys(&self, rloc: IpAddr) -> Option<Arc<KeySet>>;
}

/// In-memory key store fed by the control plane
#[derive(Debug, Default)]
pub struct DecapKeyStore {
    keys: RwLock<HashMap<IpAddr, Arc<KeySet>>>,
}

impl DecapKeyStore {
    /// Create an empty key store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the key set for an RLOC
    pub fn insert(&self, rloc: IpAddr, keys: KeySet) {
        let slots = keys.len();
        self.keys.write().insert(rloc, Arc::new(keys));
        info!("Installed decap keys for RLOC {} ({} slots)", rloc, slots);
    }

    /// Validate and install control-plane key material for one RLOC
    ///
    /// # Errors
    ///
    /// Returns `KeyError` and leaves the previous keys in place if any entry
    /// is invalid.
    pub fn install(&self, entry: &RlocKeys) -> Result<(), KeyError> {
        let set = KeySet::from_entries(&entry.keys)?;
        self.insert(entry.rloc, set);
        Ok(())
    }

    /// Remove the key set for an RLOC, returning whether one existed
    pub fn remove(&self, rloc: IpAddr) -> bool {
        let removed = self.keys.write().remove(&rloc).is_some();
        if removed {
            info!("Removed decap keys for RLOC {}", rloc);
        } else {
            debug!("No decap keys to remove for RLOC {}", rloc);
        }
        removed
    }

    /// Number of RLOCs with keys
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.read().len()
    }

    /// Whether no keys are installed
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.read().is_empty()
    }
}

impl KeyStore for DecapKeyStore {
    fn lookup_decap_keys(&self, rloc: IpAddr) -> Option<Arc<KeySet>> {
        self.keys.read().get(&rloc).cloned()
    }
}
