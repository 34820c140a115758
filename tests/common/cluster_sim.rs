// Multi-node simulation: one controller per node over shared in-memory
// store and directories

use super::fixtures::{RecordingService, RoleBoard, ScriptedProber};
use namenode_ha::controller::{ControllerSettings, HaController, PassOutcome};
use namenode_ha::directory::{MemoryCoordination, MemoryJournal, PeerRelation};
use namenode_ha::ha::HaContext;
use namenode_ha::local_state::LocalState;
use namenode_ha::probe::WaitPolicy;
use namenode_ha::store::{HaFlag, HaStore, MemoryCluster};
use namenode_ha::types::{ChosenClusterSet, CoordinationMember, NodeId};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub const QUORUM: usize = 3;
pub const NAMENODE_PORT: u16 = 8020;

pub fn test_settings() -> ControllerSettings {
    ControllerSettings {
        quorum_size: QUORUM,
        wait_policy: WaitPolicy {
            poll_interval: Duration::from_millis(10),
            timeout: Duration::from_millis(200),
        },
        status_interval: Duration::from_secs(60),
    }
}

/// Shared world all simulated nodes see.
pub struct TestCluster {
    pub store: MemoryCluster,
    pub peers: PeerRelation,
    pub journal: MemoryJournal,
    pub coordination: MemoryCoordination,
    pub prober: Arc<ScriptedProber>,
    pub board: Arc<RoleBoard>,
    dir: TempDir,
}

impl TestCluster {
    pub fn new() -> Self {
        Self {
            store: MemoryCluster::new(),
            peers: PeerRelation::new(),
            journal: MemoryJournal::new(8485),
            coordination: MemoryCoordination::new(),
            prober: ScriptedProber::new(),
            board: RoleBoard::new(),
            dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// Join `count` journal peers named `jn-0`, `jn-1`, ...
    pub fn add_journal_nodes(&self, count: usize) {
        for i in 0..count {
            self.journal.join(NodeId::new(format!("jn-{}", i)));
        }
    }

    pub fn set_leader(&self, node: &str) {
        self.store.set_leader(Some(node.into()));
    }

    pub fn enable_coordination(&self) {
        self.coordination
            .set_members(vec![CoordinationMember::new("zk-0", 2181)]);
        self.coordination.set_ready(true);
    }

    /// Join a new, reachable node and build its controller.
    pub fn node(&self, name: &str) -> TestNode {
        let id = NodeId::from(name);
        self.peers.join(id.clone(), name);
        self.prober.set_reachable(name, true);

        let service = RecordingService::new(id.clone(), Arc::clone(&self.board));
        let local_state =
            LocalState::open(&self.dir.path().join(name)).expect("Failed to open local state");

        let ctx = HaContext {
            local: id.clone(),
            namenode_port: NAMENODE_PORT,
            store: HaStore::new(Arc::new(self.store.store(id.clone()))),
            local_state,
            service: service.clone(),
            prober: self.prober.clone(),
            peers: Arc::new(self.peers.view(id.clone())),
            journal: Arc::new(self.journal.clone()),
            coordination: Arc::new(self.coordination.clone()),
        };

        TestNode {
            id,
            controller: HaController::new(ctx, test_settings()),
            service,
        }
    }

    pub fn flag(&self, flag: HaFlag) -> bool {
        self.store.peek(flag.key()).as_deref() == Some("true")
    }

    pub fn chosen(&self) -> ChosenClusterSet {
        self.store
            .peek(namenode_ha::store::CHOSEN_SET_KEY)
            .map(|raw| serde_json::from_str(&raw).expect("chosen set is JSON"))
            .unwrap_or_default()
    }
}

pub struct TestNode {
    pub id: NodeId,
    pub controller: HaController,
    pub service: Arc<RecordingService>,
}

impl TestNode {
    pub async fn reconcile(&mut self) -> PassOutcome {
        self.controller
            .reconcile_once()
            .await
            .expect("observation should not fail against in-memory collaborators")
    }
}

/// Run one pass on every node, in order, `rounds` times.
pub async fn settle(nodes: &mut [&mut TestNode], rounds: usize) {
    for _ in 0..rounds {
        for node in nodes.iter_mut() {
            node.reconcile().await;
        }
    }
}
