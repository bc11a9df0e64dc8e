//! Synchronization errors.

use crate::validation::ValidationErrors;
use thiserror::Error;

/// Failure of one synchronization pass, or of startup.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Malformed desired state. Not retried; the next update re-enqueues.
    #[error("invalid desired state: {0}")]
    Validation(#[from] ValidationErrors),

    #[error("failed to fetch desired state: {0}")]
    Store(#[source] common::Error),

    #[error("failed to read cluster membership: {0}")]
    Membership(#[source] common::Error),

    #[error("failed to install configuration: {0}")]
    Install(#[source] common::Error),

    #[error("failed to reload keepalived: {0}")]
    Reload(#[source] common::Error),

    #[error("sync panicked: {0}")]
    Panicked(String),

    /// The daemon control surface could not be opened.
    #[error("startup failed: {0}")]
    Startup(String),
}

impl SyncError {
    /// Whether the key should be requeued with backoff.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, SyncError::Validation(_) | SyncError::Startup(_))
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::Validation(_) => "validation",
            SyncError::Store(_) => "store",
            SyncError::Membership(_) => "membership",
            SyncError::Install(_) => "install",
            SyncError::Reload(_) => "reload",
            SyncError::Panicked(_) => "panic",
            SyncError::Startup(_) => "startup",
        }
    }
}
