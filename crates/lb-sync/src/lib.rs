//! lb-sync: control plane for an IPVS Direct-Routing load balancer.
//!
//! Watches a declarative description of virtual IPs and backend pools and
//! keeps the local keepalived configuration in line with it, while VRRP
//! decides which node forwards traffic.
//!
//! # Components
//!
//! - **Resolver**: turns declared backends plus live membership into real servers
//! - **Compiler**: renders the keepalived configuration
//! - **Reconciler**: one level-triggered sync pass per dequeued key
//! - **Controller**: event dispatch and the rate-limited work queue workers
//! - **Failover**: clears stale neighbor entries after becoming MASTER

pub mod compiler;
pub mod config;
pub mod controller;
pub mod daemon;
pub mod error;
pub mod failover;
pub mod http_server;
pub mod metrics;
pub mod model;
pub mod queue;
pub mod reconciler;
pub mod resolver;
pub mod server;
pub mod source;
pub mod validation;

pub use config::{Config, ConfigError};
pub use controller::Controller;
pub use daemon::{Daemon, KeepalivedDaemon};
pub use error::SyncError;
pub use metrics::MetricsRegistry;
pub use model::{ChangeEvent, ClusterMembership, DesiredState, Event, Node, ObjectKey};
pub use reconciler::{Reconciler, SyncOutcome, SyncSettings};
pub use server::LbSyncServer;
pub use source::{DesiredStateStore, FileSource, MembershipSource};
