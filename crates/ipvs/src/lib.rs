//! IPVS (IP Virtual Server) data model for the lb-sync control plane.
//!
//! These types describe what keepalived will program into the kernel IPVS
//! table: one virtual server per `(fwmark, protocol)` pair, Direct-Routing
//! forwarding, and a weighted list of real servers.
//!
//! # Example
//!
//! ```
//! use ipvs::{Protocol, RealServer, Scheduler, VirtualServer};
//!
//! let vs = VirtualServer {
//!     fwmark: 1,
//!     protocol: Protocol::TCP,
//!     scheduler: "wrr".parse().unwrap(),
//!     real_servers: vec![RealServer::new("10.1.0.2".parse().unwrap(), 1)],
//! };
//! assert_eq!(vs.scheduler, Scheduler::WeightedRoundRobin);
//! assert_eq!(vs.to_string(), "FWM 1 TCP (wrr)");
//! ```

mod types;

pub use types::{
    DEFAULT_WEIGHT, LVS_METHOD_DR, PERSISTENCE_TIMEOUT_SECS, Protocol, RealServer, Scheduler,
    VirtualServer,
};
