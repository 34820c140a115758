//! HA coordination: membership, bootstrap, failover and status.
//!
//! Every stage is level-triggered. A pass first gathers an [`Observation`]
//! of the current world, then each stage evaluates pure guard predicates over
//! it and applies whatever transition is due. Stages update the observation
//! in place when they change something, so later stages in the same pass see
//! the new state.

pub mod bootstrap;
pub mod failover;
pub mod membership;
pub mod status;

pub use bootstrap::{BootstrapController, ConfigChange, PairingGate, PairingOutcome};
pub use failover::FailoverCoordinator;
pub use membership::MembershipSelector;
pub use status::{FailoverMode, MissingReason, StatusInputs, StatusReporter, Verdict};

use crate::directory::{CoordinationDirectory, JournalDirectory, PeerDirectory};
use crate::local_state::LocalState;
use crate::probe::Prober;
use crate::quorum::QuorumStatus;
use crate::service::StorageService;
use crate::store::HaStore;
use crate::types::{ChosenClusterSet, CoordinationMember, HaRole, JournalPeerSet, NodeId};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Collaborators shared by all stages.
pub struct HaContext {
    /// Local node identity.
    pub local: NodeId,
    /// NameNode port, probed for reachability.
    pub namenode_port: u16,
    /// Cluster-wide coordination store.
    pub store: HaStore,
    /// Node-local durable flags.
    pub local_state: LocalState,
    pub service: Arc<dyn StorageService>,
    pub prober: Arc<dyn Prober>,
    pub peers: Arc<dyn PeerDirectory>,
    pub journal: Arc<dyn JournalDirectory>,
    pub coordination: Arc<dyn CoordinationDirectory>,
}

/// Snapshot of the cluster-visible flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HaFlags {
    pub namenode_ha: bool,
    pub ha_initialized: bool,
    pub zk_formatted: bool,
    pub cluster_activated: bool,
}

/// Everything a pass needs to know, gathered once at the start.
#[derive(Debug, Clone)]
pub struct Observation {
    pub is_leader: bool,
    /// Joined NameNode peers, excluding the local node, sorted.
    pub peers: Vec<NodeId>,
    pub journal: JournalPeerSet,
    pub quorum: QuorumStatus,
    pub coordination_ready: bool,
    /// Coordination members sorted by host.
    pub coordination_members: Vec<CoordinationMember>,
    pub standby_ready: bool,
    pub flags: HaFlags,
    /// `None` when the stored value is unusable.
    pub chosen: Option<ChosenClusterSet>,
    /// Node that claimed the shared edit log initialization.
    pub shared_edits_owner: Option<NodeId>,
    /// Observed roles of the chosen nodes.
    pub roles: BTreeMap<NodeId, HaRole>,
}

impl Observation {
    /// At least one other NameNode has joined.
    pub fn clustered(&self) -> bool {
        !self.peers.is_empty()
    }

    /// The chosen set, treating an unusable value as empty.
    pub fn chosen_or_empty(&self) -> ChosenClusterSet {
        self.chosen.clone().unwrap_or_default()
    }

    pub fn is_chosen(&self, node: &NodeId) -> bool {
        self.chosen.as_ref().map(|c| c.contains(node)).unwrap_or(false)
    }
}
