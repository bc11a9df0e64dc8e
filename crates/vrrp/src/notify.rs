//! Observation of VRRP role changes reported by keepalived.
//!
//! keepalived writes one line per state change to its `notify_fifo`:
//!
//! ```text
//! INSTANCE "default_lb" MASTER 100
//! ```
//!
//! Only `INSTANCE` lines are of interest. FAULT is treated as BACKUP (the
//! instance owns no addresses) and STOP as INIT.

use crate::types::{Transition, VRRPState};
use common::{Error, Result};
use nix::sys::stat::Mode;
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::net::unix::pipe;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Parse a keepalived notify line into `(instance, state)`.
///
/// Returns `None` for lines that do not describe a VRRP instance.
pub fn parse_notify_line(line: &str) -> Option<(String, VRRPState)> {
    let mut parts = line.split_whitespace();
    if parts.next()? != "INSTANCE" {
        return None;
    }

    let instance = parts.next()?.trim_matches('"').to_string();
    let state = match parts.next()? {
        "MASTER" => VRRPState::Master,
        "BACKUP" | "FAULT" => VRRPState::Backup,
        "STOP" => VRRPState::Init,
        _ => return None,
    };

    Some((instance, state))
}

/// Tracks the last reported role of one VRRP instance.
///
/// Only real changes of role produce a [`Transition`]; repeated reports of
/// the same state are swallowed.
#[derive(Debug)]
pub struct TransitionTracker {
    instance: String,
    state: VRRPState,
}

impl TransitionTracker {
    /// Create a tracker for `instance`, starting in INIT.
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
            state: VRRPState::Init,
        }
    }

    /// Name of the tracked instance.
    pub fn instance(&self) -> &str {
        &self.instance
    }

    /// Last reported state.
    pub fn state(&self) -> VRRPState {
        self.state
    }

    /// Record a reported state and return the transition it represents.
    pub fn observe(&mut self, reported: VRRPState) -> Option<Transition> {
        let previous = self.state;
        if previous == reported {
            return None;
        }
        self.state = reported;

        match (previous, reported) {
            (VRRPState::Init, VRRPState::Master) => {
                // keepalived always passes through BACKUP; we only missed it.
                warn!(
                    instance = %self.instance,
                    "MASTER reported without a preceding BACKUP report"
                );
                Some(Transition::BecameMaster)
            }
            (_, VRRPState::Master) => Some(Transition::BecameMaster),
            (_, VRRPState::Backup) => Some(Transition::BecameBackup),
            (_, VRRPState::Init) => {
                debug!(instance = %self.instance, "VRRP instance stopped");
                None
            }
        }
    }
}

/// Read notify lines from `reader` and forward transitions of the tracked
/// instance to `tx` until EOF, cancellation, or the receiver going away.
pub async fn forward_transitions<R>(
    reader: R,
    tracker: &mut TransitionTracker,
    tx: &mpsc::Sender<Transition>,
    cancel: &CancellationToken,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();

    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            line = lines.next_line() => line?,
        };

        let Some(line) = line else {
            return Ok(());
        };

        let Some((instance, state)) = parse_notify_line(&line) else {
            trace!(line = %line, "Ignoring notify line");
            continue;
        };

        if instance != tracker.instance() {
            trace!(instance = %instance, "Ignoring foreign VRRP instance");
            continue;
        }

        if let Some(transition) = tracker.observe(state) {
            info!(instance = %instance, state = %transition, "VRRP transition reported");
            if tx.send(transition).await.is_err() {
                return Ok(());
            }
        }
    }
}

/// Delay before reopening the FIFO after a read error.
const REOPEN_DELAY: Duration = Duration::from_secs(1);

/// Watches keepalived's notify FIFO for role changes of one instance.
pub struct TransitionWatcher {
    path: PathBuf,
    tracker: TransitionTracker,
    receiver: pipe::Receiver,
}

impl TransitionWatcher {
    /// Create the FIFO at `path` if needed and open it for `instance`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(path: impl Into<PathBuf>, instance: impl Into<String>) -> Result<Self> {
        let path = path.into();
        Self::ensure_fifo(&path)?;
        let receiver = Self::open_receiver(&path)?;
        Ok(Self {
            path,
            tracker: TransitionTracker::new(instance),
            receiver,
        })
    }

    /// Create the FIFO if it does not exist yet.
    pub fn ensure_fifo(path: &Path) -> Result<()> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.file_type().is_fifo() => Ok(()),
            Ok(_) => Err(Error::vrrp(format!(
                "{} exists and is not a FIFO",
                path.display()
            ))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                nix::unistd::mkfifo(path, Mode::S_IRUSR | Mode::S_IWUSR)
                    .map_err(|e| Error::vrrp(format!("mkfifo {}: {}", path.display(), e)))?;
                debug!(path = %path.display(), "Created notify FIFO");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn open_receiver(path: &Path) -> Result<pipe::Receiver> {
        // Opened read-write so the pipe never reports EOF when keepalived
        // closes its end between reports.
        pipe::OpenOptions::new()
            .read_write(true)
            .open_receiver(path)
            .map_err(|e| Error::vrrp(format!("open {}: {}", path.display(), e)))
    }

    /// Run until cancelled or `tx` closes, sending every transition to `tx`.
    ///
    /// Read errors and unexpected EOF reopen the FIFO; the last reported
    /// role is kept across reopens.
    pub async fn run(self, tx: mpsc::Sender<Transition>, cancel: CancellationToken) {
        let Self {
            path,
            mut tracker,
            receiver,
        } = self;

        info!(
            path = %path.display(),
            instance = %tracker.instance(),
            "Watching VRRP transitions"
        );

        let mut reader = BufReader::new(receiver);
        loop {
            match forward_transitions(&mut reader, &mut tracker, &tx, &cancel).await {
                Ok(()) if cancel.is_cancelled() || tx.is_closed() => return,
                Ok(()) => warn!(path = %path.display(), "Notify FIFO reached EOF, reopening"),
                Err(e) => warn!(path = %path.display(), error = %e, "Notify FIFO read failed, reopening"),
            }

            reader = loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(REOPEN_DELAY) => {}
                }
                match Self::ensure_fifo(&path).and_then(|()| Self::open_receiver(&path)) {
                    Ok(receiver) => break BufReader::new(receiver),
                    Err(e) => warn!(path = %path.display(), error = %e, "Failed to reopen notify FIFO"),
                }
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[test]
    fn test_parse_instance_lines() {
        assert_eq!(
            parse_notify_line(r#"INSTANCE "default_lb" MASTER 100"#),
            Some(("default_lb".to_string(), VRRPState::Master))
        );
        assert_eq!(
            parse_notify_line(r#"INSTANCE "default_lb" FAULT 100"#),
            Some(("default_lb".to_string(), VRRPState::Backup))
        );
        assert_eq!(
            parse_notify_line(r#"INSTANCE "default_lb" STOP 0"#),
            Some(("default_lb".to_string(), VRRPState::Init))
        );
    }

    #[test]
    fn test_parse_ignores_other_lines() {
        assert_eq!(parse_notify_line(r#"GROUP "g1" MASTER 100"#), None);
        assert_eq!(parse_notify_line("VS [10.0.0.5]:tcp:80 UP"), None);
        assert_eq!(parse_notify_line(""), None);
        assert_eq!(parse_notify_line(r#"INSTANCE "x" DANCING 1"#), None);
    }

    #[test]
    fn test_tracker_transitions() {
        let mut tracker = TransitionTracker::new("lb");
        assert_eq!(tracker.observe(VRRPState::Backup), Some(Transition::BecameBackup));
        assert_eq!(tracker.observe(VRRPState::Backup), None);
        assert_eq!(tracker.observe(VRRPState::Master), Some(Transition::BecameMaster));
        assert_eq!(tracker.observe(VRRPState::Master), None);
        assert_eq!(tracker.observe(VRRPState::Backup), Some(Transition::BecameBackup));
        assert_eq!(tracker.observe(VRRPState::Init), None);
        assert_eq!(tracker.state(), VRRPState::Init);
    }

    #[test]
    fn test_tracker_init_to_master_still_reported() {
        let mut tracker = TransitionTracker::new("lb");
        assert_eq!(tracker.observe(VRRPState::Master), Some(Transition::BecameMaster));
    }

    #[tokio::test]
    async fn test_forward_filters_instance() {
        let input = concat!(
            "INSTANCE \"other\" MASTER 100\n",
            "INSTANCE \"lb\" BACKUP 100\n",
            "INSTANCE \"lb\" BACKUP 100\n",
            "VS [10.0.0.5]:tcp:0 UP\n",
            "INSTANCE \"lb\" MASTER 100\n",
        );
        let (tx, mut rx) = mpsc::channel(8);
        let mut tracker = TransitionTracker::new("lb");
        let cancel = CancellationToken::new();

        forward_transitions(input.as_bytes(), &mut tracker, &tx, &cancel)
            .await
            .unwrap();
        drop(tx);

        assert_eq!(rx.recv().await, Some(Transition::BecameBackup));
        assert_eq!(rx.recv().await, Some(Transition::BecameMaster));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_open_rejects_regular_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notify");
        std::fs::write(&path, b"").unwrap();
        assert!(TransitionWatcher::open(&path, "lb").is_err());
    }

    #[tokio::test]
    async fn test_watcher_reads_fifo_until_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notify");
        let watcher = TransitionWatcher::open(&path, "lb").unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(watcher.run(tx, cancel.clone()));

        // keepalived opens, writes a line and closes for every report.
        for line in ["INSTANCE \"lb\" BACKUP 100\n", "INSTANCE \"lb\" MASTER 100\n"] {
            let mut sender = pipe::OpenOptions::new().open_sender(&path).unwrap();
            sender.write_all(line.as_bytes()).await.unwrap();
        }

        assert_eq!(rx.recv().await, Some(Transition::BecameBackup));
        assert_eq!(rx.recv().await, Some(Transition::BecameMaster));

        cancel.cancel();
        handle.await.unwrap();
    }

    #[test]
    fn test_ensure_fifo_rejects_regular_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notify");
        std::fs::write(&path, b"").unwrap();
        assert!(TransitionWatcher::ensure_fifo(&path).is_err());
    }

    #[test]
    fn test_ensure_fifo_creates_fifo() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notify");
        TransitionWatcher::ensure_fifo(&path).unwrap();
        assert!(std::fs::metadata(&path).unwrap().file_type().is_fifo());
        // Idempotent
        TransitionWatcher::ensure_fifo(&path).unwrap();
    }
}
