//! Uplink tracking
//!
//! - [`UplinkRegistry`]: starts, retargets and tears down per-uplink captures
//! - [`UplinkAddrs`] / [`PreferredAddrs`]: preferred source addresses derived
//!   from the uplink set

mod addrs;
mod registry;
mod types;

pub use addrs::{PreferredAddrs, UplinkAddrSink, UplinkAddrs};
pub use registry::{RegistrySnapshot, UplinkRegistry, UplinkStatus};
pub use types::Uplink;
