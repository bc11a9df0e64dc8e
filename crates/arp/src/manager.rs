//! Invalidation of neighbor entries for addresses this node now owns.

use crate::netlink::NetlinkSocket;
use crate::types::NeighborEntry;
use common::{Error, Result};
use std::collections::HashSet;
use std::net::IpAddr;
use tracing::{debug, info, warn};

/// Read and mutate access to a neighbor table.
#[cfg_attr(test, mockall::automock)]
pub trait NeighborTable: Send {
    /// Snapshot of every entry in the table.
    fn entries(&mut self) -> Result<Vec<NeighborEntry>>;

    /// Remove a single entry.
    fn remove(&mut self, entry: &NeighborEntry) -> Result<()>;
}

/// The kernel's IPv4 and IPv6 neighbor tables, over rtnetlink.
pub struct KernelNeighborTable {
    socket: NetlinkSocket,
}

impl KernelNeighborTable {
    pub fn new() -> Result<Self> {
        Ok(Self {
            socket: NetlinkSocket::new()?,
        })
    }
}

impl NeighborTable for KernelNeighborTable {
    fn entries(&mut self) -> Result<Vec<NeighborEntry>> {
        self.socket.dump_neighbors()
    }

    fn remove(&mut self, entry: &NeighborEntry) -> Result<()> {
        let ifindex = nix::net::if_::if_nametoindex(entry.device.as_str())
            .map_err(|e| Error::neighbor(format!("interface {}: {}", entry.device, e)))?;
        self.socket.delete_neighbor(ifindex, entry.ip)
    }
}

/// Outcome of one invalidation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InvalidationReport {
    /// Entries whose address is owned
    pub matched: usize,
    /// Entries successfully removed
    pub removed: usize,
    /// Entries whose removal failed
    pub failed: usize,
}

/// Clears neighbor entries for owned virtual addresses.
///
/// Entries are removed whatever their link-layer address or state: after
/// a role change, any cached resolution of an owned address is suspect.
pub struct ArpCacheManager<T> {
    table: T,
}

impl<T: NeighborTable> ArpCacheManager<T> {
    pub fn new(table: T) -> Self {
        Self { table }
    }

    /// Remove every entry whose address is in `owned`.
    ///
    /// Reads the table once. A failed read aborts the pass; failed removals
    /// are logged and counted, and the remaining entries are still
    /// processed. Running with no matching entries is a no-op.
    pub fn invalidate(&mut self, owned: &[IpAddr]) -> Result<InvalidationReport> {
        let mut report = InvalidationReport::default();
        if owned.is_empty() {
            return Ok(report);
        }

        let owned: HashSet<&IpAddr> = owned.iter().collect();
        let entries = self.table.entries()?;

        for entry in entries.iter().filter(|e| owned.contains(&e.ip)) {
            report.matched += 1;
            match self.table.remove(entry) {
                Ok(()) => {
                    debug!(entry = %entry, "Removed neighbor entry");
                    report.removed += 1;
                }
                Err(e) => {
                    warn!(entry = %entry, error = %e, "Failed to remove neighbor entry");
                    report.failed += 1;
                }
            }
        }

        info!(
            matched = report.matched,
            removed = report.removed,
            failed = report.failed,
            "Neighbor cache invalidated"
        );

        Ok(report)
    }
}
