//! IPVS data types and structures.

use common::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

/// Weight given to a real server when the desired state names none.
pub const DEFAULT_WEIGHT: u32 = 1;

/// Session affinity timeout applied to every virtual server (seconds).
pub const PERSISTENCE_TIMEOUT_SECS: u32 = 360;

/// IP protocol for IPVS services.
///
/// Ordering is declaration order, so TCP blocks are always rendered
/// before UDP blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Protocol {
    #[serde(alias = "tcp")]
    TCP,
    #[serde(alias = "udp")]
    UDP,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::TCP => write!(f, "TCP"),
            Protocol::UDP => write!(f, "UDP"),
        }
    }
}

/// IPVS scheduling algorithm.
///
/// Only algorithms shipped with the kernel are representable; anything
/// else is rejected at parse time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheduler {
    RoundRobin,
    WeightedRoundRobin,
    LeastConnection,
    WeightedLeastConnection,
    LocalityBasedLeastConnection,
    LocalityBasedLeastConnectionReplication,
    DestinationHashing,
    SourceHashing,
    ShortestExpectedDelay,
    NeverQueue,
    MaglevHashing,
}

impl Scheduler {
    /// Every recognized scheduler, in kernel documentation order.
    pub const ALL: [Scheduler; 11] = [
        Scheduler::RoundRobin,
        Scheduler::WeightedRoundRobin,
        Scheduler::LeastConnection,
        Scheduler::WeightedLeastConnection,
        Scheduler::LocalityBasedLeastConnection,
        Scheduler::LocalityBasedLeastConnectionReplication,
        Scheduler::DestinationHashing,
        Scheduler::SourceHashing,
        Scheduler::ShortestExpectedDelay,
        Scheduler::NeverQueue,
        Scheduler::MaglevHashing,
    ];

    /// Kernel module suffix (`ip_vs_<name>`) for this scheduler.
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheduler::RoundRobin => "rr",
            Scheduler::WeightedRoundRobin => "wrr",
            Scheduler::LeastConnection => "lc",
            Scheduler::WeightedLeastConnection => "wlc",
            Scheduler::LocalityBasedLeastConnection => "lblc",
            Scheduler::LocalityBasedLeastConnectionReplication => "lblcr",
            Scheduler::DestinationHashing => "dh",
            Scheduler::SourceHashing => "sh",
            Scheduler::ShortestExpectedDelay => "sed",
            Scheduler::NeverQueue => "nq",
            Scheduler::MaglevHashing => "mh",
        }
    }
}

impl fmt::Display for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scheduler {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Scheduler::ALL
            .into_iter()
            .find(|sched| sched.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| Error::ipvs(format!("unknown scheduler {:?}", s)))
    }
}

/// keepalived `lvs_method` of Direct Routing, the only forwarding method used.
pub const LVS_METHOD_DR: &str = "DR";

/// An IPVS destination (real server).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RealServer {
    pub address: IpAddr,
    /// 0 means "use the service port".
    pub port: u16,
    /// 0 is a valid, drained destination.
    pub weight: u32,
}

impl RealServer {
    /// Real server on the service port.
    pub fn new(address: IpAddr, weight: u32) -> Self {
        Self {
            address,
            port: 0,
            weight,
        }
    }

    /// Whether the destination is drained (receives no new connections).
    pub fn is_drained(&self) -> bool {
        self.weight == 0
    }
}

impl fmt::Display for RealServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} (weight {})", self.address, self.port, self.weight)
    }
}

/// A fully resolved IPVS virtual server, ready to be compiled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualServer {
    pub fwmark: u32,
    pub protocol: Protocol,
    pub scheduler: Scheduler,
    /// Sorted by address.
    pub real_servers: Vec<RealServer>,
}

impl fmt::Display for VirtualServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FWM {} {} ({})", self.fwmark, self.protocol, self.scheduler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheduler_round_trip_names() {
        for sched in Scheduler::ALL {
            assert_eq!(sched.as_str().parse::<Scheduler>().unwrap(), sched);
        }
    }

    #[test]
    fn test_scheduler_parse_is_case_insensitive() {
        assert_eq!("WRR".parse::<Scheduler>().unwrap(), Scheduler::WeightedRoundRobin);
        assert_eq!(" wlc ".parse::<Scheduler>().unwrap(), Scheduler::WeightedLeastConnection);
    }

    #[test]
    fn test_scheduler_rejects_unknown() {
        let err = "fastest".parse::<Scheduler>().unwrap_err();
        assert!(err.to_string().contains("fastest"));
    }

    #[test]
    fn test_protocol_ordering_and_serde() {
        assert!(Protocol::TCP < Protocol::UDP);
        let p: Protocol = serde_json::from_str("\"tcp\"").unwrap();
        assert_eq!(p, Protocol::TCP);
        let p: Protocol = serde_json::from_str("\"UDP\"").unwrap();
        assert_eq!(p, Protocol::UDP);
    }

    #[test]
    fn test_drained_real_server() {
        let rs = RealServer::new("10.1.0.2".parse().unwrap(), 0);
        assert!(rs.is_drained());
        assert_eq!(rs.port, 0);
        assert_eq!(rs.to_string(), "10.1.0.2:0 (weight 0)");
    }
}
