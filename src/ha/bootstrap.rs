//! HA eligibility, standalone start and pair bootstrap.
//!
//! The active side runs on the leader once the cluster is HA eligible and the
//! journal quorum holds; the standby side runs on every chosen node that has
//! not bootstrapped yet. The one-time external operations
//! (`initSharedEditLogs`, `bootstrapStandby`) are guarded by node-local flags
//! recorded right after they succeed, so a retried bootstrap never repeats
//! them once they went through.
//!
//! Before initializing the shared edit log the leader claims it in the
//! coordination store. The claim outlives leadership: a later leader never
//! initializes again but waits for the owner to come up and pairs with it,
//! while the owner finishes its own side as a follower.

use super::membership::seed_pair;
use super::{HaContext, Observation};
use crate::controller::ControlEvent;
use crate::error::{HaError, Result};
use crate::local_state::{LocalFlag, LocalState};
use crate::observability;
use crate::probe::{wait_reachable, Prober, WaitPolicy};
use crate::service::ROLE_QUERY_TIMEOUT;
use crate::store::HaFlag;
use crate::types::{BootstrapState, HaRole, NodeId};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const CLUSTER_NODES_KEY: &str = "namenode.cluster-nodes";
const JOURNAL_KEY: &str = "namenode.jn.config";

/// Result of one pairing-gate check.
#[derive(Debug)]
pub enum PairingOutcome {
    /// The peer answered and can be paired with.
    Ready(NodeId),
    /// A background wait is in flight for this peer.
    Waiting(NodeId),
    /// No peer has joined.
    NoCandidates,
    /// The wait gave up.
    TimedOut(HaError),
}

struct PendingWait {
    node: NodeId,
    // Dropping the sender cancels the wait.
    cancel: watch::Sender<bool>,
    handle: JoinHandle<Result<()>>,
}

/// Non-blocking wait for the first standby candidate.
///
/// The control loop never blocks on pairing: the wait runs as a background
/// task that wakes the loop through `notify` when the peer answers. The wait
/// is dropped when its target leaves, when another peer answers first, and on
/// shutdown.
pub struct PairingGate {
    policy: WaitPolicy,
    notify: Option<mpsc::Sender<ControlEvent>>,
    pending: Option<PendingWait>,
}

impl PairingGate {
    pub fn new(policy: WaitPolicy, notify: Option<mpsc::Sender<ControlEvent>>) -> Self {
        Self {
            policy,
            notify,
            pending: None,
        }
    }

    pub fn is_waiting(&self) -> bool {
        self.pending.is_some()
    }

    /// Abandon any in-flight wait.
    pub fn cancel(&mut self) {
        if let Some(pending) = self.pending.take() {
            let _ = pending.cancel.send(true);
            debug!(node = %pending.node, "Pairing wait cancelled");
        }
    }

    /// Check whether one of `peers` (sorted) can be paired with.
    pub async fn check(
        &mut self,
        peers: &[NodeId],
        prober: &Arc<dyn Prober>,
        port: u16,
    ) -> PairingOutcome {
        if let Some(pending) = self.pending.take() {
            if !peers.contains(&pending.node) {
                info!(node = %pending.node, "Pairing target left, abandoning wait");
                let _ = pending.cancel.send(true);
            } else if pending.handle.is_finished() {
                let node = pending.node;
                return match pending.handle.await {
                    Ok(Ok(())) => PairingOutcome::Ready(node),
                    Ok(Err(e)) => {
                        warn!(node = %node, error = %e, "Standby never became reachable");
                        PairingOutcome::TimedOut(e)
                    }
                    Err(e) => PairingOutcome::TimedOut(HaError::Internal(format!(
                        "pairing wait for {} failed: {}",
                        node, e
                    ))),
                };
            } else {
                self.pending = Some(pending);
            }
        }

        if peers.is_empty() {
            return PairingOutcome::NoCandidates;
        }

        for peer in peers {
            if prober.probe(peer, port).await {
                self.cancel();
                return PairingOutcome::Ready(peer.clone());
            }
        }

        if let Some(pending) = &self.pending {
            return PairingOutcome::Waiting(pending.node.clone());
        }

        let target = peers[0].clone();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let prober = Arc::clone(prober);
        let notify = self.notify.clone();
        let policy = self.policy;
        let node = target.clone();
        let handle = tokio::spawn(async move {
            let result = wait_reachable(prober, node.clone(), port, policy, cancel_rx).await;
            if result.is_ok() {
                if let Some(tx) = notify {
                    let _ = tx.send(ControlEvent::PeerReachable(node)).await;
                }
            }
            result
        });

        info!(
            node = %target,
            timeout_ms = self.policy.timeout.as_millis() as u64,
            "Waiting for standby candidate to become reachable"
        );
        self.pending = Some(PendingWait {
            node: target.clone(),
            cancel: cancel_tx,
            handle,
        });
        PairingOutcome::Waiting(target)
    }
}

/// What a config update did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigChange {
    /// Preconditions not met.
    Skipped,
    /// Inputs unchanged since the last applied config.
    Unchanged,
    /// Config rewritten, service not running.
    Reconfigured,
    /// Journal peers changed on a running service.
    Reloaded,
    /// Chosen set changed on a running service.
    Restarted,
}

/// Drives eligibility, standalone start and the HA bootstrap.
pub struct BootstrapController {
    gate: PairingGate,
}

impl BootstrapController {
    pub fn new(gate: PairingGate) -> Self {
        Self { gate }
    }

    pub fn gate(&self) -> &PairingGate {
        &self.gate
    }

    pub fn cancel_pairing(&mut self) {
        self.gate.cancel();
    }

    /// The leader marks the cluster HA eligible once clustered with quorum.
    pub fn can_enable_ha(obs: &Observation) -> bool {
        obs.is_leader && !obs.flags.namenode_ha && obs.clustered() && obs.quorum.satisfied
    }

    pub fn should_start_standalone(obs: &Observation, ls: &LocalState) -> bool {
        !obs.flags.namenode_ha
            && !ls.is_set(LocalFlag::Started)
            && !ls.is_set(LocalFlag::BootstrapCompleted)
    }

    pub fn should_bootstrap_active(obs: &Observation) -> bool {
        obs.is_leader
            && obs.flags.namenode_ha
            && !obs.flags.ha_initialized
            && obs.clustered()
            && !obs.journal.is_empty()
            && obs.quorum.satisfied
    }

    /// The shared edits owner finishes its active side once it is no longer
    /// the one driving the bootstrap.
    pub fn should_resume_active(obs: &Observation, ls: &LocalState, local: &NodeId) -> bool {
        obs.flags.namenode_ha
            && obs.shared_edits_owner.as_ref() == Some(local)
            && !ls.is_set(LocalFlag::BootstrapCompleted)
            && !Self::should_bootstrap_active(obs)
    }

    pub fn should_bootstrap_standby(obs: &Observation, ls: &LocalState, local: &NodeId) -> bool {
        obs.flags.ha_initialized
            && obs.is_chosen(local)
            && obs.shared_edits_owner.as_ref() != Some(local)
            && !ls.is_set(LocalFlag::BootstrapCompleted)
            && !obs.journal.is_empty()
    }

    /// Current bootstrap state of the local node.
    pub fn state(obs: &Observation, ls: &LocalState, local: &NodeId) -> BootstrapState {
        if ls.is_set(LocalFlag::BootstrapCompleted) {
            BootstrapState::Initialized
        } else if Self::should_bootstrap_active(obs) || Self::should_resume_active(obs, ls, local) {
            BootstrapState::ActiveBootstrapping
        } else if Self::should_bootstrap_standby(obs, ls, local) {
            BootstrapState::StandbyBootstrapping
        } else {
            BootstrapState::Uninitialized
        }
    }

    /// Apply whichever transition is due.
    pub async fn reconcile(&mut self, ctx: &HaContext, obs: &mut Observation) -> Result<()> {
        self.enable_ha(ctx, obs).await?;

        if Self::should_start_standalone(obs, &ctx.local_state) {
            start_standalone(ctx).await?;
        }

        if Self::should_bootstrap_active(obs) {
            self.bootstrap_active(ctx, obs).await?;
        } else if self.gate.is_waiting() {
            self.gate.cancel();
        }

        if Self::should_resume_active(obs, &ctx.local_state, &ctx.local) {
            resume_active(ctx, obs).await?;
        }

        if Self::should_bootstrap_standby(obs, &ctx.local_state, &ctx.local) {
            bootstrap_standby(ctx, obs).await?;
        }

        update_ha_config(ctx, obs).await?;
        Ok(())
    }

    async fn enable_ha(&self, ctx: &HaContext, obs: &mut Observation) -> Result<()> {
        if !Self::can_enable_ha(obs) {
            return Ok(());
        }
        ctx.store.set_flag(HaFlag::NamenodeHa).await?;
        obs.flags.namenode_ha = true;
        info!(
            peers = obs.peers.len(),
            journal = obs.quorum.joined,
            "Cluster is HA eligible"
        );
        Ok(())
    }

    async fn bootstrap_active(&mut self, ctx: &HaContext, obs: &mut Observation) -> Result<()> {
        if let Some(owner) = obs.shared_edits_owner.clone().filter(|o| *o != ctx.local) {
            self.gate.cancel();
            return adopt_owner(ctx, obs, owner).await;
        }

        let standby = match self
            .gate
            .check(&obs.peers, &ctx.prober, ctx.namenode_port)
            .await
        {
            PairingOutcome::Ready(node) => node,
            PairingOutcome::Waiting(node) => {
                debug!(node = %node, "Active bootstrap waiting for standby");
                return Ok(());
            }
            PairingOutcome::NoCandidates => return Ok(()),
            PairingOutcome::TimedOut(e) => return Err(e),
        };

        let ls = &ctx.local_state;
        info!(standby = %standby, "Starting active bootstrap");

        if ls.is_set(LocalFlag::Started) {
            ctx.service.stop().await?;
            ls.set(LocalFlag::Started, false)?;
        }

        obs.chosen = Some(seed_pair(&ctx.store, &ctx.local, &standby).await?);
        apply_ha_config(ctx, obs).await?;

        if !ctx.store.claim_shared_edits(&ctx.local).await? {
            return Err(HaError::NotReady(
                "shared edit log claimed by another node".to_string(),
            ));
        }
        obs.shared_edits_owner = Some(ctx.local.clone());
        finish_active(ctx).await?;

        ctx.store.set_flag(HaFlag::HaInitialized).await?;
        obs.flags.ha_initialized = true;
        ls.set(LocalFlag::BootstrapCompleted, true)?;

        observability::record_bootstrap("active");
        info!(standby = %standby, "Active bootstrap complete");
        Ok(())
    }
}

/// Node-local half of the active bootstrap. Every step is skipped once it
/// went through.
async fn finish_active(ctx: &HaContext) -> Result<()> {
    let ls = &ctx.local_state;
    if !ls.is_set(LocalFlag::Formatted) {
        ctx.service.format().await?;
        ls.set(LocalFlag::Formatted, true)?;
    }
    if !ls.is_set(LocalFlag::SharedEditsInitialized) {
        ctx.service.init_shared_edit_logs().await?;
        ls.set(LocalFlag::SharedEditsInitialized, true)?;
    }
    if !ls.is_set(LocalFlag::Started) {
        ctx.service.start().await?;
        ls.set(LocalFlag::Started, true)?;
    }
    Ok(())
}

/// Finish the active side on the shared edits owner after it lost the lead.
async fn resume_active(ctx: &HaContext, obs: &Observation) -> Result<()> {
    info!(node = %ctx.local, "Resuming active bootstrap as shared edits owner");
    apply_ha_config(ctx, obs).await?;
    finish_active(ctx).await?;
    ctx.local_state.set(LocalFlag::BootstrapCompleted, true)?;

    observability::record_bootstrap("active");
    info!(node = %ctx.local, "Active bootstrap complete");
    Ok(())
}

/// Leader side of a bootstrap another node started: once the shared edits
/// owner runs, pair with it and mark the cluster initialized.
async fn adopt_owner(ctx: &HaContext, obs: &mut Observation, owner: NodeId) -> Result<()> {
    if !obs.peers.contains(&owner) {
        return Err(HaError::NotReady(format!(
            "shared edits owner {} has left the cluster",
            owner
        )));
    }

    let role = match tokio::time::timeout(ROLE_QUERY_TIMEOUT, ctx.service.ha_state(&owner)).await {
        Ok(Ok(role)) => role,
        Ok(Err(e)) => {
            debug!(owner = %owner, error = %e, "Role query failed");
            HaRole::Unknown
        }
        Err(_) => HaRole::Unknown,
    };
    if !matches!(role, HaRole::Active | HaRole::Standby) {
        debug!(owner = %owner, role = %role, "Waiting for shared edits owner to start");
        return Ok(());
    }

    let pair = match obs.chosen.as_ref() {
        Some(chosen) if chosen.contains(&owner) && chosen.len() > 1 => chosen.clone(),
        _ => seed_pair(&ctx.store, &owner, &ctx.local).await?,
    };
    obs.chosen = Some(pair);
    ctx.store.set_flag(HaFlag::HaInitialized).await?;
    obs.flags.ha_initialized = true;

    info!(owner = %owner, "Paired with shared edits owner");
    Ok(())
}

/// Start a single NameNode without HA.
async fn start_standalone(ctx: &HaContext) -> Result<()> {
    let ls = &ctx.local_state;
    info!(node = %ctx.local, "Starting standalone NameNode");

    ctx.service.configure(std::slice::from_ref(&ctx.local)).await?;
    if !ls.is_set(LocalFlag::Formatted) {
        ctx.service.format().await?;
        ls.set(LocalFlag::Formatted, true)?;
    }
    ctx.service.start().await?;
    ls.set(LocalFlag::Started, true)?;
    Ok(())
}

/// Copy the active namespace onto this node and start it as standby.
async fn bootstrap_standby(ctx: &HaContext, obs: &mut Observation) -> Result<()> {
    let ls = &ctx.local_state;
    info!(node = %ctx.local, "Starting standby bootstrap");

    if ls.is_set(LocalFlag::Started) {
        ctx.service.stop().await?;
        ls.set(LocalFlag::Started, false)?;
    }

    apply_ha_config(ctx, obs).await?;

    if !ls.is_set(LocalFlag::StandbyBootstrapped) {
        ctx.service.bootstrap_standby().await?;
        ls.set(LocalFlag::StandbyBootstrapped, true)?;
    }

    ctx.service.start().await?;
    ls.set(LocalFlag::Started, true)?;
    ls.set(LocalFlag::BootstrapCompleted, true)?;

    if !ls.is_set(LocalFlag::StandbyReadySignalled) {
        ctx.peers.signal_standby_ready().await?;
        ls.set(LocalFlag::StandbyReadySignalled, true)?;
    }
    obs.standby_ready = true;

    observability::record_bootstrap("standby");
    info!(node = %ctx.local, "Standby bootstrap complete");
    Ok(())
}

/// Keep the HA site configuration in line with the chosen set and journal
/// peers once the pair is initialized.
pub async fn update_ha_config(ctx: &HaContext, obs: &Observation) -> Result<ConfigChange> {
    if !obs.flags.ha_initialized || obs.journal.is_empty() {
        return Ok(ConfigChange::Skipped);
    }
    apply_ha_config(ctx, obs).await
}

async fn apply_ha_config(ctx: &HaContext, obs: &Observation) -> Result<ConfigChange> {
    let Some(chosen) = obs.chosen.as_ref().filter(|c| !c.is_empty()) else {
        debug!("Chosen set unavailable, leaving configuration as is");
        return Ok(ConfigChange::Skipped);
    };
    let ls = &ctx.local_state;

    let cluster_changed = ls.is_changed(CLUSTER_NODES_KEY, chosen)?;
    let journal_changed = ls.is_changed(JOURNAL_KEY, &obs.journal)?;
    if !cluster_changed && !journal_changed {
        return Ok(ConfigChange::Unchanged);
    }

    ctx.service.configure(chosen.members()).await?;
    ctx.service
        .register_journal_nodes(&obs.journal.nodes, obs.journal.port)
        .await?;

    let started = ls.is_set(LocalFlag::Started);
    let change = if started && cluster_changed {
        info!(chosen = ?chosen.members(), "Chosen set changed, restarting NameNode");
        ctx.service.restart().await?;
        observability::record_restart("cluster_nodes");
        ConfigChange::Restarted
    } else if started && journal_changed {
        info!(journal = ?obs.journal.nodes, "Journal peers changed, reloading peer list");
        ctx.service.reload_peer_list().await?;
        ConfigChange::Reloaded
    } else {
        ConfigChange::Reconfigured
    };

    ls.record(CLUSTER_NODES_KEY, chosen)?;
    ls.record(JOURNAL_KEY, &obs.journal)?;
    Ok(change)
}
