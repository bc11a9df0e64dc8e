//! Logging utilities for lb-sync components.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Build the filter: `RUST_LOG` wins over the configured level.
fn filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Initialize human-readable tracing output at the given default level.
pub fn init_with_level(level: &str) {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter(level))
        .init();
}

/// Initialize tracing with JSON formatting (useful for structured logging).
pub fn init_json_with_level(level: &str) {
    tracing_subscriber::registry()
        .with(fmt::layer().json())
        .with(filter(level))
        .init();
}
