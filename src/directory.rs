//! Peer, journal and coordination-service directories.
//!
//! Each external relation the controller reads is a narrow trait. The
//! in-memory implementations back single-host deployments and the tests;
//! [`PeerRelation`] is shared by all nodes and hands each one a view that
//! excludes itself.

use crate::error::Result;
use crate::types::{CoordinationMember, NodeId};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::debug;

/// Other NameNode peers.
#[async_trait]
pub trait PeerDirectory: Send + Sync {
    /// Joined peers, excluding the local node.
    async fn joined_nodes(&self) -> Vec<NodeId>;

    /// Peer identity to address.
    async fn hosts_map(&self) -> HashMap<NodeId, String>;

    /// Publish the chosen NameNodes to consumers of the relation.
    async fn send_peer_list(&self, nodes: &[NodeId]) -> Result<()>;

    /// Tell peers that this node finished its standby bootstrap.
    async fn signal_standby_ready(&self) -> Result<()>;

    /// Whether some node signalled standby readiness.
    async fn standby_ready(&self) -> bool;
}

/// Journal peers providing the shared edit log.
#[async_trait]
pub trait JournalDirectory: Send + Sync {
    async fn joined_nodes(&self) -> Vec<NodeId>;

    async fn port(&self) -> u16;

    /// Whether the journal side reports itself ready for HA.
    async fn quorum_ready(&self) -> bool;
}

/// External coordination (ZooKeeper) service.
#[async_trait]
pub trait CoordinationDirectory: Send + Sync {
    async fn members(&self) -> Vec<CoordinationMember>;

    async fn ready(&self) -> bool;
}

#[derive(Default)]
struct RelationState {
    joined: BTreeMap<NodeId, String>,
    standby_ready: BTreeSet<NodeId>,
    published: Option<Vec<NodeId>>,
}

/// Shared in-memory NameNode peer relation.
#[derive(Clone, Default)]
pub struct PeerRelation {
    state: Arc<RwLock<RelationState>>,
}

impl PeerRelation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join a node with its address.
    pub fn join(&self, node: NodeId, addr: impl Into<String>) {
        self.state.write().joined.insert(node, addr.into());
    }

    /// Remove a node from the relation.
    pub fn leave(&self, node: &NodeId) {
        let mut state = self.state.write();
        state.joined.remove(node);
        state.standby_ready.remove(node);
    }

    /// The relation as seen from `local`.
    pub fn view(&self, local: NodeId) -> MemoryPeers {
        MemoryPeers {
            relation: self.clone(),
            local,
        }
    }

    /// The last published NameNode list.
    pub fn published(&self) -> Option<Vec<NodeId>> {
        self.state.read().published.clone()
    }
}

/// One node's view of a [`PeerRelation`].
#[derive(Clone)]
pub struct MemoryPeers {
    relation: PeerRelation,
    local: NodeId,
}

#[async_trait]
impl PeerDirectory for MemoryPeers {
    async fn joined_nodes(&self) -> Vec<NodeId> {
        self.relation
            .state
            .read()
            .joined
            .keys()
            .filter(|n| **n != self.local)
            .cloned()
            .collect()
    }

    async fn hosts_map(&self) -> HashMap<NodeId, String> {
        self.relation
            .state
            .read()
            .joined
            .iter()
            .filter(|(n, _)| **n != self.local)
            .map(|(n, a)| (n.clone(), a.clone()))
            .collect()
    }

    async fn send_peer_list(&self, nodes: &[NodeId]) -> Result<()> {
        debug!(nodes = ?nodes, "Publishing NameNode list");
        self.relation.state.write().published = Some(nodes.to_vec());
        Ok(())
    }

    async fn signal_standby_ready(&self) -> Result<()> {
        self.relation
            .state
            .write()
            .standby_ready
            .insert(self.local.clone());
        Ok(())
    }

    async fn standby_ready(&self) -> bool {
        !self.relation.state.read().standby_ready.is_empty()
    }
}

#[derive(Debug)]
struct JournalState {
    nodes: BTreeSet<NodeId>,
    port: u16,
    ready: bool,
}

/// In-memory journal relation.
#[derive(Clone)]
pub struct MemoryJournal {
    state: Arc<RwLock<JournalState>>,
}

impl MemoryJournal {
    pub fn new(port: u16) -> Self {
        Self {
            state: Arc::new(RwLock::new(JournalState {
                nodes: BTreeSet::new(),
                port,
                ready: true,
            })),
        }
    }

    pub fn join(&self, node: NodeId) {
        self.state.write().nodes.insert(node);
    }

    pub fn leave(&self, node: &NodeId) {
        self.state.write().nodes.remove(node);
    }

    pub fn set_port(&self, port: u16) {
        self.state.write().port = port;
    }

    pub fn set_ready(&self, ready: bool) {
        self.state.write().ready = ready;
    }
}

#[async_trait]
impl JournalDirectory for MemoryJournal {
    async fn joined_nodes(&self) -> Vec<NodeId> {
        self.state.read().nodes.iter().cloned().collect()
    }

    async fn port(&self) -> u16 {
        self.state.read().port
    }

    async fn quorum_ready(&self) -> bool {
        self.state.read().ready
    }
}

#[derive(Debug, Default)]
struct CoordinationState {
    members: Vec<CoordinationMember>,
    ready: bool,
}

/// In-memory coordination-service relation.
#[derive(Clone, Default)]
pub struct MemoryCoordination {
    state: Arc<RwLock<CoordinationState>>,
}

impl MemoryCoordination {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_members(&self, members: Vec<CoordinationMember>) {
        self.state.write().members = members;
    }

    pub fn set_ready(&self, ready: bool) {
        self.state.write().ready = ready;
    }
}

#[async_trait]
impl CoordinationDirectory for MemoryCoordination {
    async fn members(&self) -> Vec<CoordinationMember> {
        self.state.read().members.clone()
    }

    async fn ready(&self) -> bool {
        let state = self.state.read();
        state.ready && !state.members.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_view_excludes_local() {
        let relation = PeerRelation::new();
        relation.join("nn-0".into(), "10.0.0.1");
        relation.join("nn-1".into(), "10.0.0.2");

        let view = relation.view("nn-0".into());
        assert_eq!(view.joined_nodes().await, vec![NodeId::from("nn-1")]);
        assert_eq!(view.hosts_map().await.len(), 1);
    }

    #[tokio::test]
    async fn test_standby_ready_is_shared() {
        let relation = PeerRelation::new();
        let a = relation.view("nn-0".into());
        let b = relation.view("nn-1".into());
        assert!(!a.standby_ready().await);
        b.signal_standby_ready().await.unwrap();
        assert!(a.standby_ready().await);

        relation.leave(&"nn-1".into());
        assert!(!a.standby_ready().await);
    }

    #[tokio::test]
    async fn test_coordination_needs_members() {
        let zk = MemoryCoordination::new();
        zk.set_ready(true);
        assert!(!zk.ready().await);
        zk.set_members(vec![CoordinationMember::new("zk-0", 2181)]);
        assert!(zk.ready().await);
    }
}
