//! Cluster-wide coordination store.
//!
//! The store holds the chosen HA pair and the cluster-visible HA flags. It is
//! readable by every node and writable only by the current leader; the
//! single-writer rule is enforced here by refusing writes from non-leaders,
//! never by falling back to a local write.
//!
//! [`HaStore`] is the controller's view of the store: a read cache that is
//! invalidated per key by watch notifications and written through on leader
//! writes.

mod memory;

pub use memory::{MemoryCluster, MemoryStore};

use crate::error::{HaError, Result};
use crate::types::{ChosenClusterSet, NodeId};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;
use tracing::{debug, info, warn};

/// Key holding the JSON-encoded chosen set.
pub const CHOSEN_SET_KEY: &str = "cluster-nodes";

/// Key naming the node that owns the shared edit log initialization. Written
/// before the first attempt and never cleared.
pub const SHARED_EDITS_KEY: &str = "shared-edits-owner";

/// Cluster-visible boolean markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HaFlag {
    /// The cluster is HA eligible. Never cleared.
    NamenodeHa,
    /// The active-side bootstrap completed. Never cleared.
    HaInitialized,
    /// The failover backing store is formatted. Cleared on coordination loss.
    ZkFormatted,
    /// An active NameNode was selected without automatic failover.
    ClusterActivated,
}

impl HaFlag {
    pub const ALL: [HaFlag; 4] = [
        HaFlag::NamenodeHa,
        HaFlag::HaInitialized,
        HaFlag::ZkFormatted,
        HaFlag::ClusterActivated,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            HaFlag::NamenodeHa => "namenode-ha",
            HaFlag::HaInitialized => "ha-initialized",
            HaFlag::ZkFormatted => "zk-formatted",
            HaFlag::ClusterActivated => "cluster-activated",
        }
    }

    /// Monotonic flags are never cleared once set.
    pub fn is_monotonic(&self) -> bool {
        !matches!(self, HaFlag::ZkFormatted)
    }
}

impl fmt::Display for HaFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Notification emitted by a coordination store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// A key was written or removed.
    Changed { key: String },
    /// Leadership moved.
    LeadershipChanged { leader: Option<NodeId> },
}

/// Leader-writable, all-readable replicated key/value store.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Read a key.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write (`Some`) or remove (`None`) a key. Fails with
    /// [`HaError::NotLeader`] on non-leaders.
    async fn set(&self, key: &str, value: Option<&str>) -> Result<()>;

    /// Whether this node currently holds leadership.
    fn is_leader(&self) -> bool;

    /// Subscribe to change notifications.
    fn subscribe(&self) -> broadcast::Receiver<StoreEvent>;
}

/// Cached, typed view over a [`CoordinationStore`].
pub struct HaStore {
    inner: Arc<dyn CoordinationStore>,
    cache: RwLock<HashMap<String, Option<String>>>,
    events: Mutex<broadcast::Receiver<StoreEvent>>,
}

impl HaStore {
    pub fn new(inner: Arc<dyn CoordinationStore>) -> Self {
        let events = inner.subscribe();
        Self {
            inner,
            cache: RwLock::new(HashMap::new()),
            events: Mutex::new(events),
        }
    }

    pub fn is_leader(&self) -> bool {
        self.inner.is_leader()
    }

    /// A fresh subscription, for waking the control loop.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.inner.subscribe()
    }

    /// Apply pending watch notifications to the cache.
    ///
    /// Returns the number of notifications consumed.
    pub fn refresh(&self) -> usize {
        let mut events = self.events.lock();
        let mut consumed = 0;
        loop {
            match events.try_recv() {
                Ok(StoreEvent::Changed { key }) => {
                    self.cache.write().remove(&key);
                    consumed += 1;
                }
                Ok(StoreEvent::LeadershipChanged { .. }) => {
                    consumed += 1;
                }
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "Store notifications lagged, dropping cache");
                    self.cache.write().clear();
                    consumed += 1;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
        consumed
    }

    /// Drop every cached value.
    pub fn invalidate_all(&self) {
        self.cache.write().clear();
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let cached = self.cache.read().get(key).cloned();
        if let Some(value) = cached {
            return Ok(value);
        }
        let value = self.inner.get(key).await?;
        self.cache.write().insert(key.to_string(), value.clone());
        Ok(value)
    }

    async fn put(&self, key: &str, value: Option<&str>) -> Result<()> {
        if !self.inner.is_leader() {
            return Err(HaError::NotLeader);
        }
        self.inner.set(key, value).await?;
        self.cache
            .write()
            .insert(key.to_string(), value.map(str::to_string));
        Ok(())
    }

    /// Read a flag; anything other than `"true"` counts as unset.
    pub async fn flag(&self, flag: HaFlag) -> Result<bool> {
        Ok(self.get(flag.key()).await?.as_deref() == Some("true"))
    }

    /// Set a flag (leader only). Returns `false` when it was already set.
    pub async fn set_flag(&self, flag: HaFlag) -> Result<bool> {
        if self.flag(flag).await? {
            return Ok(false);
        }
        self.put(flag.key(), Some("true")).await?;
        info!(flag = %flag, "HA flag set");
        Ok(true)
    }

    /// Clear a non-monotonic flag (leader only). Returns `false` when it was
    /// not set.
    pub async fn clear_flag(&self, flag: HaFlag) -> Result<bool> {
        if flag.is_monotonic() {
            return Err(HaError::Internal(format!(
                "refusing to clear monotonic flag {}",
                flag
            )));
        }
        if !self.flag(flag).await? {
            return Ok(false);
        }
        self.put(flag.key(), None).await?;
        info!(flag = %flag, "HA flag cleared");
        Ok(true)
    }

    /// Read the chosen set. An absent key is an empty set; a malformed value
    /// is reported as [`HaError::NotReady`].
    pub async fn chosen_set(&self) -> Result<ChosenClusterSet> {
        match self.get(CHOSEN_SET_KEY).await? {
            None => Ok(ChosenClusterSet::empty()),
            Some(raw) if raw.trim().is_empty() => Ok(ChosenClusterSet::empty()),
            Some(raw) => {
                let nodes: Vec<NodeId> = serde_json::from_str(&raw).map_err(|e| {
                    HaError::NotReady(format!("malformed {} value: {}", CHOSEN_SET_KEY, e))
                })?;
                Ok(ChosenClusterSet::new(nodes))
            }
        }
    }

    /// Persist the chosen set (leader only), skipping identical writes.
    /// Returns `true` when a write happened.
    pub async fn set_chosen_set(&self, set: &ChosenClusterSet) -> Result<bool> {
        let current = match self.chosen_set().await {
            Ok(current) => Some(current),
            Err(e) if e.is_not_ready() => None,
            Err(e) => return Err(e),
        };
        if current.as_ref() == Some(set) {
            debug!(chosen = ?set.members(), "Chosen set unchanged");
            return Ok(false);
        }
        let encoded = serde_json::to_string(set)?;
        self.put(CHOSEN_SET_KEY, Some(&encoded)).await?;
        info!(chosen = ?set.members(), "Chosen set updated");
        Ok(true)
    }

    /// Node that claimed the shared edit log initialization, if any.
    pub async fn shared_edits_owner(&self) -> Result<Option<NodeId>> {
        Ok(self
            .get(SHARED_EDITS_KEY)
            .await?
            .filter(|raw| !raw.trim().is_empty())
            .map(NodeId::new))
    }

    /// Claim the shared edit log initialization for `node` (leader only).
    ///
    /// Returns `true` when `node` owns the claim afterwards. A claim held by
    /// another node is never overwritten.
    pub async fn claim_shared_edits(&self, node: &NodeId) -> Result<bool> {
        match self.shared_edits_owner().await? {
            Some(owner) => Ok(owner == *node),
            None => {
                self.put(SHARED_EDITS_KEY, Some(node.as_str())).await?;
                info!(node = %node, "Shared edit log initialization claimed");
                Ok(true)
            }
        }
    }
}
