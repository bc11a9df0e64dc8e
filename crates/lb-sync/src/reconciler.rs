//! One synchronization pass: desired state in, keepalived configuration out.
//!
//! The reconciler is level-triggered. Every pass fetches the latest
//! desired state and a fresh membership snapshot, so coalesced or skipped
//! notifications never lose information.

use crate::compiler::{GlobalDefs, compile};
use crate::daemon::Daemon;
use crate::error::SyncError;
use crate::metrics::MetricsRegistry;
use crate::model::ObjectKey;
use crate::resolver::{resolve_unicast, resolve_virtual_servers, resolve_vrrp};
use crate::source::{DesiredStateStore, MembershipSource};
use crate::validation::{ValidationErrors, validate};
use dashmap::DashMap;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

/// Node-local inputs to compilation.
#[derive(Debug, Clone, Default)]
pub struct SyncSettings {
    /// Source address for unicast elections.
    pub node_address: Option<IpAddr>,
    pub global: GlobalDefs,
}

/// Result of a pass that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// A new configuration was installed and keepalived reloaded.
    Installed,
    /// The compiled configuration matched the installed one.
    Unchanged,
    /// The object no longer exists; it is no longer managed.
    Deleted,
    /// The object was recreated under the same name; a newer
    /// notification will drive it.
    Stale,
}

impl SyncOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncOutcome::Installed => "installed",
            SyncOutcome::Unchanged => "unchanged",
            SyncOutcome::Deleted => "deleted",
            SyncOutcome::Stale => "stale",
        }
    }
}

impl fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct Reconciler {
    store: Arc<dyn DesiredStateStore>,
    membership: Arc<dyn MembershipSource>,
    daemon: Arc<dyn Daemon>,
    settings: SyncSettings,
    /// Last artifact installed per key.
    installed: DashMap<ObjectKey, String>,
    owned_vips: watch::Sender<Vec<IpAddr>>,
    metrics: Arc<MetricsRegistry>,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn DesiredStateStore>,
        membership: Arc<dyn MembershipSource>,
        daemon: Arc<dyn Daemon>,
        settings: SyncSettings,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        let (owned_vips, _) = watch::channel(Vec::new());
        Self {
            store,
            membership,
            daemon,
            settings,
            installed: DashMap::new(),
            owned_vips,
            metrics,
        }
    }

    /// Virtual IPs of the last installed configuration.
    pub fn subscribe_owned_vips(&self) -> watch::Receiver<Vec<IpAddr>> {
        self.owned_vips.subscribe()
    }

    /// The artifact last installed for `key`.
    pub fn installed(&self, key: &ObjectKey) -> Option<String> {
        self.installed.get(key).map(|entry| entry.value().clone())
    }

    /// Drive `key` to its desired state.
    ///
    /// `trigger_uid` is the uid of the object whose notification queued
    /// the key; a fetched object with a different uid is skipped.
    pub async fn sync(&self, key: &ObjectKey, trigger_uid: Option<&str>) -> Result<SyncOutcome, SyncError> {
        let Some(state) = self.store.get(key).await.map_err(SyncError::Store)? else {
            info!(key = %key, "Load balancer no longer exists, stopping management");
            self.installed.remove(key);
            self.owned_vips.send_replace(Vec::new());
            return Ok(SyncOutcome::Deleted);
        };

        if let Some(uid) = trigger_uid {
            if uid != state.metadata.uid {
                debug!(
                    key = %key,
                    expected = uid,
                    found = %state.metadata.uid,
                    "Object was recreated, skipping pass"
                );
                return Ok(SyncOutcome::Stale);
            }
        }

        let spec = validate(&state)?;

        let unicast = match (&spec.unicast_peers, self.settings.node_address) {
            (None, _) => None,
            (Some(peers), Some(source)) => Some(resolve_unicast(peers, source)),
            (Some(_), None) => {
                return Err(ValidationErrors(vec![
                    "unicastPeers requires node.address to be configured".to_string(),
                ])
                .into());
            }
        };

        let membership = self.membership.snapshot().await.map_err(SyncError::Membership)?;
        let servers = resolve_virtual_servers(&spec, &membership);
        let instance = resolve_vrrp(key, &spec, unicast);
        instance.validate().map_err(|e| ValidationErrors(vec![e]))?;
        let artifact = compile(&self.settings.global, &instance, &servers);

        if self.installed.get(key).is_some_and(|prev| *prev == artifact) {
            debug!(key = %key, "Configuration unchanged");
            return Ok(SyncOutcome::Unchanged);
        }

        self.daemon.install_and_reload(&artifact).await?;
        self.metrics.record_reload();
        self.installed.insert(key.clone(), artifact);
        self.owned_vips.send_replace(spec.vips.clone());

        info!(
            key = %key,
            resource_version = %state.metadata.resource_version,
            virtual_servers = servers.len(),
            real_servers = servers.iter().map(|vs| vs.real_servers.len()).sum::<usize>(),
            "Installed keepalived configuration"
        );
        Ok(SyncOutcome::Installed)
    }
}
