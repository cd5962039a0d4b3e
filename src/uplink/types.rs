//! Uplink description as delivered by the device network manager

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

/// One uplink interface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Uplink {
    /// Interface name (e.g. `eth0`)
    pub name: String,

    /// Assigned addresses, in preference order
    #[serde(default)]
    pub addrs: Vec<IpAddr>,

    /// Free (unmetered) uplinks are the only ones used for LISP traffic
    #[serde(default = "default_true")]
    pub free: bool,
}

impl Uplink {
    /// Create a free uplink
    pub fn new(name: impl Into<String>, addrs: Vec<IpAddr>) -> Self {
        Self {
            name: name.into(),
            addrs,
            free: true,
        }
    }

    /// Whether this uplink should have a capture
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.free && !self.name.is_empty()
    }
}
