//! Virtual Router Redundancy Protocol (VRRP) model for lb-sync.
//!
//! The VRRP election itself runs inside keepalived. This crate only
//! describes the instance keepalived is configured with and observes the
//! role changes keepalived reports.
//!
//! # Features
//!
//! - VRRP instance definition (initial state BACKUP, `nopreempt` always)
//! - Unicast peer mode for networks without multicast
//! - Parsing of keepalived `notify_fifo` reports
//! - Role tracking that turns reports into [`Transition`] events
//!
//! # Example
//!
//! ```
//! use vrrp::{TransitionTracker, Transition, VRRPState, parse_notify_line};
//!
//! let mut tracker = TransitionTracker::new("default_lb");
//! let (instance, state) = parse_notify_line(r#"INSTANCE "default_lb" BACKUP 100"#).unwrap();
//! assert_eq!(instance, "default_lb");
//! assert_eq!(tracker.observe(state), Some(Transition::BecameBackup));
//! assert_eq!(tracker.observe(VRRPState::Master), Some(Transition::BecameMaster));
//! ```

mod notify;
mod types;

pub use notify::{TransitionTracker, TransitionWatcher, forward_transitions, parse_notify_line};
pub use types::{
    DEFAULT_ADVERT_INTERVAL, MAX_INTERFACE_NAME_LEN, MAX_PRIORITY, Transition, Unicast, VRRPConfig,
    VRRPState, is_valid_interface_name,
};
