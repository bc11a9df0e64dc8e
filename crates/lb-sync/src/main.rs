//! lb-sync binary

use lb_sync::{Config, LbSyncServer};
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Tracing is not initialized yet
    let config = match Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return Err(e.into());
        }
    };

    let level = config.logging.level.as_deref().unwrap_or("info");
    if config.json_logging() {
        common::logging::init_json_with_level(level);
    } else {
        common::logging::init_with_level(level);
    }

    tracing::info!("lb-sync starting");

    let cancel = CancellationToken::new();
    let mut sigterm = signal(SignalKind::terminate())?;
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => tracing::info!("Received SIGINT"),
                _ = sigterm.recv() => tracing::info!("Received SIGTERM"),
            }
            cancel.cancel();
        });
    }

    LbSyncServer::new(config).run(cancel).await
}
