//! Common utilities and types shared across the lb-sync crates.

pub mod error;
pub mod logging;

pub use error::{Error, Result};
