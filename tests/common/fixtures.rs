// Recording fakes for the external collaborators

use async_trait::async_trait;
use namenode_ha::error::{HaError, Result};
use namenode_ha::probe::Prober;
use namenode_ha::service::StorageService;
use namenode_ha::types::{CoordinationMember, HaRole, NodeId};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Actual HA roles across the simulated cluster, shared by every node's
/// service so role queries see what the other nodes did.
#[derive(Default)]
pub struct RoleBoard {
    roles: RwLock<HashMap<NodeId, HaRole>>,
}

impl RoleBoard {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn get(&self, node: &NodeId) -> HaRole {
        self.roles.read().get(node).copied().unwrap_or(HaRole::Down)
    }

    pub fn set(&self, node: &NodeId, role: HaRole) {
        self.roles.write().insert(node.clone(), role);
    }

    pub fn active(&self) -> Vec<NodeId> {
        self.roles
            .read()
            .iter()
            .filter(|(_, r)| **r == HaRole::Active)
            .map(|(n, _)| n.clone())
            .collect()
    }
}

/// `StorageService` that records every call and can be told to fail.
pub struct RecordingService {
    node: NodeId,
    board: Arc<RoleBoard>,
    calls: Mutex<Vec<String>>,
    failures: Mutex<HashMap<String, usize>>,
    /// Nodes whose role queries fail until cleared.
    unanswered: Mutex<HashSet<NodeId>>,
    configured: Mutex<Vec<NodeId>>,
    coordination: Mutex<Vec<CoordinationMember>>,
}

impl RecordingService {
    pub fn new(node: NodeId, board: Arc<RoleBoard>) -> Arc<Self> {
        Arc::new(Self {
            node,
            board,
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
            unanswered: Mutex::new(HashSet::new()),
            configured: Mutex::new(Vec::new()),
            coordination: Mutex::new(Vec::new()),
        })
    }

    /// Make the next `times` calls of `op` fail.
    pub fn fail_next(&self, op: &str, times: usize) {
        self.failures.lock().insert(op.to_string(), times);
    }

    /// Make role queries about `node` fail (`true`) or answer again.
    pub fn fail_role_query(&self, node: &NodeId, failing: bool) {
        let mut unanswered = self.unanswered.lock();
        if failing {
            unanswered.insert(node.clone());
        } else {
            unanswered.remove(node);
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn count(&self, op: &str) -> usize {
        self.calls.lock().iter().filter(|c| *c == op).count()
    }

    /// Position of the last call of `op`.
    pub fn last_index(&self, op: &str) -> Option<usize> {
        self.calls.lock().iter().rposition(|c| c == op)
    }

    pub fn configured_nodes(&self) -> Vec<NodeId> {
        self.configured.lock().clone()
    }

    pub fn coordination_members(&self) -> Vec<CoordinationMember> {
        self.coordination.lock().clone()
    }

    fn record(&self, op: &str) -> Result<()> {
        self.calls.lock().push(op.to_string());
        let mut failures = self.failures.lock();
        if let Some(remaining) = failures.get_mut(op) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(HaError::service(op, "injected failure"));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl StorageService for RecordingService {
    async fn configure(&self, cluster_nodes: &[NodeId]) -> Result<()> {
        self.record("configure")?;
        *self.configured.lock() = cluster_nodes.to_vec();
        Ok(())
    }

    async fn format(&self) -> Result<()> {
        self.record("format")
    }

    async fn start(&self) -> Result<()> {
        self.record("start")?;
        self.board.set(&self.node, HaRole::Standby);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.record("stop")?;
        self.board.set(&self.node, HaRole::Down);
        Ok(())
    }

    async fn restart(&self) -> Result<()> {
        self.record("restart")?;
        self.board.set(&self.node, HaRole::Standby);
        Ok(())
    }

    async fn register_journal_nodes(&self, _nodes: &[NodeId], _port: u16) -> Result<()> {
        self.record("register_journal_nodes")
    }

    async fn reload_peer_list(&self) -> Result<()> {
        self.record("reload_peer_list")
    }

    async fn init_shared_edit_logs(&self) -> Result<()> {
        self.record("init_shared_edit_logs")
    }

    async fn bootstrap_standby(&self) -> Result<()> {
        self.record("bootstrap_standby")
    }

    async fn transition_to_active(&self, node: &NodeId) -> Result<()> {
        self.record("transition_to_active")?;
        self.board.set(node, HaRole::Active);
        Ok(())
    }

    async fn configure_failover_coordinator(&self, members: &[CoordinationMember]) -> Result<()> {
        self.record("configure_failover_coordinator")?;
        *self.coordination.lock() = members.to_vec();
        Ok(())
    }

    async fn format_failover_coordinator(&self) -> Result<()> {
        self.record("format_failover_coordinator")
    }

    async fn start_failover_coordinator(&self) -> Result<()> {
        self.record("start_failover_coordinator")?;
        // The failover controller elects this node if nobody is active.
        if self.board.active().is_empty() {
            self.board.set(&self.node, HaRole::Active);
        }
        Ok(())
    }

    async fn stop_failover_coordinator(&self) -> Result<()> {
        self.record("stop_failover_coordinator")
    }

    async fn restart_failover_coordinator(&self) -> Result<()> {
        self.record("restart_failover_coordinator")
    }

    async fn ha_state(&self, node: &NodeId) -> Result<HaRole> {
        if self.unanswered.lock().contains(node) {
            return Err(HaError::service("ha_state", "connection refused"));
        }
        Ok(self.board.get(node))
    }
}

/// Prober answering from a mutable reachable set.
#[derive(Default)]
pub struct ScriptedProber {
    reachable: RwLock<HashSet<NodeId>>,
}

impl ScriptedProber {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_reachable(&self, node: &str, reachable: bool) {
        let node = NodeId::from(node);
        let mut set = self.reachable.write();
        if reachable {
            set.insert(node);
        } else {
            set.remove(&node);
        }
    }
}

#[async_trait]
impl Prober for ScriptedProber {
    async fn probe(&self, node: &NodeId, _port: u16) -> bool {
        self.reachable.read().contains(node)
    }
}
