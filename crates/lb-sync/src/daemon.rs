//! keepalived control: configuration install and reload.

use crate::error::SyncError;
use async_trait::async_trait;
use common::{Error, Result};
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// Control surface of the VRRP/IPVS daemon.
#[async_trait]
pub trait Daemon: Send + Sync {
    /// Replace the configuration as a whole.
    async fn install(&self, artifact: &str) -> Result<()>;

    /// Ask the daemon to re-read its configuration.
    async fn reload(&self) -> Result<()>;

    async fn install_and_reload(&self, artifact: &str) -> std::result::Result<(), SyncError> {
        self.install(artifact).await.map_err(SyncError::Install)?;
        self.reload().await.map_err(SyncError::Reload)
    }
}

/// A running keepalived, addressed through its pid file.
#[derive(Debug, Clone)]
pub struct KeepalivedDaemon {
    config_path: PathBuf,
    pid_file: PathBuf,
}

impl KeepalivedDaemon {
    /// Attach to a running keepalived. Fails if it is not running.
    pub async fn open(
        config_path: impl Into<PathBuf>,
        pid_file: impl Into<PathBuf>,
    ) -> std::result::Result<Self, SyncError> {
        let daemon = Self {
            config_path: config_path.into(),
            pid_file: pid_file.into(),
        };

        let pid = daemon
            .read_pid()
            .await
            .map_err(|e| SyncError::Startup(e.to_string()))?;
        kill(pid, None).map_err(|e| {
            SyncError::Startup(format!("keepalived (pid {}) is not running: {}", pid, e))
        })?;

        info!(
            pid = %pid,
            config = %daemon.config_path.display(),
            "Attached to keepalived"
        );
        Ok(daemon)
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    async fn read_pid(&self) -> Result<Pid> {
        let contents = fs::read_to_string(&self.pid_file).await.map_err(|e| {
            Error::other(format!("failed to read pid file {}: {}", self.pid_file.display(), e))
        })?;
        let pid: i32 = contents.trim().parse().map_err(|_| {
            Error::other(format!(
                "pid file {} does not contain a pid: {:?}",
                self.pid_file.display(),
                contents.trim()
            ))
        })?;
        if pid <= 0 {
            return Err(Error::other(format!("invalid pid {}", pid)));
        }
        Ok(Pid::from_raw(pid))
    }
}

/// Write `contents` next to `path` and rename it into place, so readers
/// see either the old or the new file.
pub async fn replace_file(path: &Path, contents: &[u8]) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let mut file = fs::File::create(&tmp).await?;
    file.write_all(contents).await?;
    file.sync_all().await?;
    drop(file);

    fs::rename(&tmp, path).await?;
    Ok(())
}

#[async_trait]
impl Daemon for KeepalivedDaemon {
    async fn install(&self, artifact: &str) -> Result<()> {
        replace_file(&self.config_path, artifact.as_bytes()).await?;
        debug!(path = %self.config_path.display(), bytes = artifact.len(), "Installed configuration");
        Ok(())
    }

    async fn reload(&self) -> Result<()> {
        // Re-read every time; keepalived may have been restarted.
        let pid = self.read_pid().await?;
        kill(pid, Signal::SIGHUP)
            .map_err(|e| Error::other(format!("failed to signal keepalived (pid {}): {}", pid, e)))?;
        info!(pid = %pid, "Reloaded keepalived");
        Ok(())
    }
}
