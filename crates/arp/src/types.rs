//! Neighbor table data types.

use std::fmt;
use std::net::IpAddr;

/// Ethernet link-layer address of a neighbor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HardwareAddress(pub [u8; 6]);

impl HardwareAddress {
    /// All-zero address, reported for unresolved and non-Ethernet entries.
    pub const ZERO: Self = Self([0; 6]);

    #[inline]
    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }
}

impl fmt::Display for HardwareAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

/// Resolution state of a neighbor entry, collapsed from the kernel's NUD_* states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NeighborState {
    /// Resolution in progress or failed
    Incomplete,
    /// Resolved, possibly stale
    Complete,
    /// Static entry
    Permanent,
}

/// Neighbor table entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeighborEntry {
    pub ip: IpAddr,
    pub hw_address: HardwareAddress,
    pub state: NeighborState,
    /// Interface the entry was learned on
    pub device: String,
}

impl fmt::Display for NeighborEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} lladdr {} dev {} ({:?})", self.ip, self.hw_address, self.device, self.state)
    }
}
