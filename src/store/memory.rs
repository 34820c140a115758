//! In-memory coordination store.
//!
//! A [`MemoryCluster`] is the shared replicated state; each node gets its own
//! [`MemoryStore`] handle, whose leadership is decided by the cluster.

use super::{CoordinationStore, StoreEvent};
use crate::error::{HaError, Result};
use crate::types::NodeId;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

struct Shared {
    data: RwLock<HashMap<String, String>>,
    leader: RwLock<Option<NodeId>>,
    events: broadcast::Sender<StoreEvent>,
}

/// Shared state of an in-memory coordination store.
#[derive(Clone)]
pub struct MemoryCluster {
    shared: Arc<Shared>,
}

impl MemoryCluster {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(1024);
        Self {
            shared: Arc::new(Shared {
                data: RwLock::new(HashMap::new()),
                leader: RwLock::new(None),
                events,
            }),
        }
    }

    /// A per-node handle onto this store.
    pub fn store(&self, node: NodeId) -> MemoryStore {
        MemoryStore {
            shared: Arc::clone(&self.shared),
            node,
        }
    }

    /// Move leadership (the external election primitive).
    pub fn set_leader(&self, leader: Option<NodeId>) {
        *self.shared.leader.write() = leader.clone();
        info!(leader = ?leader, "Leadership changed");
        let _ = self
            .shared
            .events
            .send(StoreEvent::LeadershipChanged { leader });
    }

    pub fn leader(&self) -> Option<NodeId> {
        self.shared.leader.read().clone()
    }

    /// Raw snapshot of a key, bypassing leadership checks.
    pub fn peek(&self, key: &str) -> Option<String> {
        self.shared.data.read().get(key).cloned()
    }
}

impl Default for MemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

/// One node's handle onto a [`MemoryCluster`].
#[derive(Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
    node: NodeId,
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.shared.data.read().get(key).cloned())
    }

    async fn set(&self, key: &str, value: Option<&str>) -> Result<()> {
        if !self.is_leader() {
            return Err(HaError::NotLeader);
        }
        {
            let mut data = self.shared.data.write();
            match value {
                Some(v) => data.insert(key.to_string(), v.to_string()),
                None => data.remove(key),
            };
        }
        let _ = self.shared.events.send(StoreEvent::Changed {
            key: key.to_string(),
        });
        Ok(())
    }

    fn is_leader(&self) -> bool {
        self.shared.leader.read().as_ref() == Some(&self.node)
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.shared.events.subscribe()
    }
}
