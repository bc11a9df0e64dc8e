//! Neighbor (ARP) cache management for VRRP failover.
//!
//! When a node becomes MASTER for a set of virtual addresses, any neighbor
//! entry it holds for those addresses is stale by definition. This crate
//! dumps the kernel's IPv4 and IPv6 neighbor tables over rtnetlink and
//! removes those entries.
//!
//! # Example
//!
//! ```no_run
//! use arp::{ArpCacheManager, KernelNeighborTable};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let table = KernelNeighborTable::new()?;
//! let mut manager = ArpCacheManager::new(table);
//!
//! // Requires CAP_NET_ADMIN
//! let report = manager.invalidate(&["10.0.0.5".parse()?])?;
//! println!("removed {} entries", report.removed);
//! # Ok(())
//! # }
//! ```

mod manager;
mod netlink;
mod types;

pub use manager::{ArpCacheManager, InvalidationReport, KernelNeighborTable, NeighborTable};
pub use netlink::NetlinkSocket;
pub use types::{HardwareAddress, NeighborEntry, NeighborState};
