//! LISP data header view

/// LISP data header length
pub const HEADER_LEN: usize = 8;

/// Reserved instance id carried by control probes
pub const CONTROL_IID: u32 = 0x00FF_FFFF;

/// Mask for the `KK` key id bits in the first header byte
const KEY_ID_MASK: u8 = 0x03;

/// Parsed view of the 8-byte LISP data header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LispHeader {
    flags: u8,
    iid: u32,
}

impl LispHeader {
    /// Parse the header from the start of `buf`
    ///
    /// Returns `None` if `buf` is shorter than [`HEADER_LEN`].
    #[must_use]
    pub fn parse(buf: &[u8]) -> Option<Self> {
        let header: &[u8; HEADER_LEN] = buf.get(..HEADER_LEN)?.try_into().ok()?;
        let word = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);
        Some(Self {
            flags: header[0],
            iid: word >> 8,
        })
    }

    /// Build a header for the given instance id and key id
    #[must_use]
    pub fn encode(iid: u32, key_id: u8) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        // I bit set, instance id present
        out[0] = 0x08 | (key_id & KEY_ID_MASK);
        out[4..8].copy_from_slice(&(iid << 8).to_be_bytes());
        out
    }

    /// 24-bit instance id
    #[must_use]
    pub const fn iid(&self) -> u32 {
        self.iid
    }

    /// Key id from the `KK` bits, 0 means cleartext
    #[must_use]
    pub const fn key_id(&self) -> u8 {
        self.flags & KEY_ID_MASK
    }

    /// Whether this header carries the reserved control instance id
    #[must_use]
    pub const fn is_control(&self) -> bool {
        self.iid == CONTROL_IID
    }
}
