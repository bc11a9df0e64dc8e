//! Desired-state and membership inputs.
//!
//! The engine only consumes the two traits below. [`FileSource`] backs both
//! with a single YAML document on disk and turns edits of that document
//! into change events.

use crate::model::{ChangeEvent, ClusterMembership, DesiredState, Event, ObjectKey};
use async_trait::async_trait;
use common::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Consistent point-in-time read of desired state by identity.
#[async_trait]
pub trait DesiredStateStore: Send + Sync {
    /// `Ok(None)` when the object does not exist.
    async fn get(&self, key: &ObjectKey) -> Result<Option<DesiredState>>;
}

/// Current candidate backend nodes.
#[async_trait]
pub trait MembershipSource: Send + Sync {
    async fn snapshot(&self) -> Result<ClusterMembership>;
}

/// On-disk document read by [`FileSource`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceDocument {
    #[serde(default)]
    pub load_balancers: Vec<DesiredState>,
    #[serde(default)]
    pub membership: ClusterMembership,
}

impl SourceDocument {
    pub fn parse(contents: &str) -> Result<Self> {
        let mut doc: SourceDocument = serde_yaml::from_str(contents)?;
        for state in &mut doc.load_balancers {
            if state.metadata.resource_version.is_empty() {
                state.metadata.resource_version = content_version(state)?;
            }
        }
        Ok(doc)
    }

    fn by_key(&self) -> BTreeMap<ObjectKey, &DesiredState> {
        self.load_balancers.iter().map(|s| (s.key(), s)).collect()
    }
}

/// Digest of an object, used as its version when the file names none.
fn content_version(state: &DesiredState) -> Result<String> {
    let mut hasher = DefaultHasher::new();
    serde_yaml::to_string(&state.spec)?.hash(&mut hasher);
    state.metadata.uid.hash(&mut hasher);
    Ok(format!("{:016x}", hasher.finish()))
}

/// Events that turn `old` into `new`.
pub fn diff(old: &SourceDocument, new: &SourceDocument) -> Vec<Event> {
    let before = old.by_key();
    let after = new.by_key();
    let mut events = Vec::new();

    for (key, state) in &after {
        match before.get(key) {
            None => events.push(Event::DesiredState(ChangeEvent::Added((*state).clone()))),
            Some(prev) if prev != state => events.push(Event::DesiredState(ChangeEvent::Updated {
                old: (*prev).clone(),
                new: (*state).clone(),
            })),
            Some(_) => {}
        }
    }
    for (key, state) in &before {
        if !after.contains_key(key) {
            events.push(Event::DesiredState(ChangeEvent::Deleted((*state).clone())));
        }
    }

    if old.membership != new.membership {
        events.push(Event::MembershipChanged);
    }
    events
}

/// Desired state and membership read from a YAML file.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn load(&self) -> Result<SourceDocument> {
        let contents = tokio::fs::read_to_string(&self.path).await?;
        SourceDocument::parse(&contents)
    }

    /// Poll the file every `interval` and send the resulting events until
    /// cancelled or the receiver goes away.
    pub async fn watch(&self, interval: Duration, tx: mpsc::Sender<Event>, cancel: CancellationToken) {
        info!(path = %self.path.display(), ?interval, "Watching desired-state file");

        let mut current = SourceDocument::default();
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let next = match self.load().await {
                Ok(doc) => doc,
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "Failed to read desired-state file");
                    continue;
                }
            };

            for event in diff(&current, &next) {
                debug!(?event, "Source change");
                if tx.send(event).await.is_err() {
                    return;
                }
            }
            current = next;
        }
    }
}

#[async_trait]
impl DesiredStateStore for FileSource {
    async fn get(&self, key: &ObjectKey) -> Result<Option<DesiredState>> {
        let doc = self.load().await?;
        Ok(doc.load_balancers.into_iter().find(|s| &s.key() == key))
    }
}

#[async_trait]
impl MembershipSource for FileSource {
    async fn snapshot(&self) -> Result<ClusterMembership> {
        Ok(self.load().await?.membership)
    }
}
