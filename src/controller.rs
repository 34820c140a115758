//! Level-triggered HA control loop.
//!
//! Every trigger (relation change, store notification, pairing wake-up or
//! the scheduled tick) runs one full pass. A pass observes the world, then
//! runs the stages in a fixed order: probing and quorum (folded into the
//! observation), membership, bootstrap, failover and status. A failing stage
//! aborts the remaining mutating stages for that pass; the status verdict is
//! always computed.

use crate::config::HaConfig;
use crate::error::{HaError, Result};
use crate::ha::bootstrap::{BootstrapController, PairingGate};
use crate::ha::status::{self, StatusInputs, StatusReporter, Verdict};
use crate::ha::{FailoverCoordinator, HaContext, HaFlags, MembershipSelector, Observation};
use crate::local_state::LocalFlag;
use crate::observability;
use crate::probe::WaitPolicy;
use crate::quorum::QuorumMonitor;
use crate::service::ROLE_QUERY_TIMEOUT;
use crate::store::{HaFlag, StoreEvent};
use crate::types::{BootstrapState, FailoverState, HaRole, JournalPeerSet, NodeId};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, error, info, warn};

const EVENT_QUEUE: usize = 64;

/// Something that warrants a reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlEvent {
    /// NameNode peers joined, left or changed.
    PeersChanged,
    /// Journal peers joined, left or changed.
    JournalChanged,
    /// Coordination service membership or readiness changed.
    CoordinationChanged,
    /// A pairing wait saw its target answer.
    PeerReachable(NodeId),
    /// Explicit request, e.g. from an operator.
    Reconcile,
}

/// Result of one pass.
#[derive(Debug)]
pub struct PassOutcome {
    pub verdict: Verdict,
    pub bootstrap: BootstrapState,
    pub failover: FailoverState,
    /// The stage failure that cut the pass short, if any.
    pub error: Option<HaError>,
}

/// Controller tunables.
#[derive(Debug, Clone, Copy)]
pub struct ControllerSettings {
    pub quorum_size: usize,
    pub wait_policy: WaitPolicy,
    pub status_interval: Duration,
}

impl From<&HaConfig> for ControllerSettings {
    fn from(config: &HaConfig) -> Self {
        Self {
            quorum_size: config.journal.quorum_size,
            wait_policy: WaitPolicy {
                poll_interval: config.probe.poll_interval,
                timeout: config.probe.pairing_timeout,
            },
            status_interval: config.control.status_interval,
        }
    }
}

/// The HA coordination controller for one node.
pub struct HaController {
    ctx: HaContext,
    quorum: QuorumMonitor,
    membership: MembershipSelector,
    bootstrap: BootstrapController,
    failover: FailoverCoordinator,
    reporter: Arc<StatusReporter>,
    status_interval: Duration,
    events_tx: mpsc::Sender<ControlEvent>,
    events_rx: mpsc::Receiver<ControlEvent>,
}

impl HaController {
    pub fn new(ctx: HaContext, settings: ControllerSettings) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE);
        let gate = PairingGate::new(settings.wait_policy, Some(events_tx.clone()));
        Self {
            ctx,
            quorum: QuorumMonitor::new(settings.quorum_size),
            membership: MembershipSelector::new(),
            bootstrap: BootstrapController::new(gate),
            failover: FailoverCoordinator::new(),
            reporter: Arc::new(StatusReporter::new()),
            status_interval: settings.status_interval,
            events_tx,
            events_rx,
        }
    }

    pub fn context(&self) -> &HaContext {
        &self.ctx
    }

    /// Sender for relation watchers to trigger passes.
    pub fn events(&self) -> mpsc::Sender<ControlEvent> {
        self.events_tx.clone()
    }

    pub fn reporter(&self) -> Arc<StatusReporter> {
        Arc::clone(&self.reporter)
    }

    pub fn verdicts(&self) -> watch::Receiver<Verdict> {
        self.reporter.subscribe()
    }

    /// Whether a pairing wait is in flight.
    pub fn is_pairing(&self) -> bool {
        self.bootstrap.gate().is_waiting()
    }

    /// Gather the observation for a pass. Roles are filled in later.
    pub async fn observe(&mut self) -> Result<Observation> {
        let ctx = &self.ctx;

        let mut peers = ctx.peers.joined_nodes().await;
        peers.retain(|p| *p != ctx.local);
        peers.sort();

        let journal = JournalPeerSet::new(ctx.journal.joined_nodes().await, ctx.journal.port().await);
        let mut quorum = self.quorum.observe(journal.len());
        if quorum.satisfied && !ctx.journal.quorum_ready().await {
            debug!("Journal peers joined but not ready");
            quorum.satisfied = false;
        }

        let mut coordination_members = ctx.coordination.members().await;
        coordination_members.sort();
        let coordination_ready = ctx.coordination.ready().await;

        let standby_ready = ctx.peers.standby_ready().await
            || ctx.local_state.is_set(LocalFlag::StandbyReadySignalled);

        let flags = HaFlags {
            namenode_ha: ctx.store.flag(HaFlag::NamenodeHa).await?,
            ha_initialized: ctx.store.flag(HaFlag::HaInitialized).await?,
            zk_formatted: ctx.store.flag(HaFlag::ZkFormatted).await?,
            cluster_activated: ctx.store.flag(HaFlag::ClusterActivated).await?,
        };

        let chosen = match ctx.store.chosen_set().await {
            Ok(chosen) => Some(chosen),
            Err(e) if e.is_not_ready() => {
                warn!(error = %e, "Chosen set unusable, treating as not ready");
                None
            }
            Err(e) => return Err(e),
        };

        Ok(Observation {
            is_leader: ctx.store.is_leader(),
            peers,
            journal,
            quorum,
            coordination_ready,
            coordination_members,
            standby_ready,
            flags,
            chosen,
            shared_edits_owner: ctx.store.shared_edits_owner().await?,
            roles: BTreeMap::new(),
        })
    }

    /// Query the HA role of every chosen node. Failures never abort a pass.
    async fn observe_roles(&self, obs: &mut Observation) {
        obs.roles.clear();
        if !obs.flags.namenode_ha {
            return;
        }
        let Some(chosen) = obs.chosen.clone() else {
            return;
        };

        for node in chosen.iter() {
            let role = if *node == self.ctx.local && !self.ctx.local_state.is_set(LocalFlag::Started) {
                HaRole::Down
            } else {
                match tokio::time::timeout(ROLE_QUERY_TIMEOUT, self.ctx.service.ha_state(node)).await {
                    Ok(Ok(role)) => role,
                    Ok(Err(e)) => {
                        debug!(node = %node, error = %e, "Role query failed");
                        HaRole::Unknown
                    }
                    Err(_) => {
                        debug!(node = %node, "Role query timed out");
                        HaRole::Unknown
                    }
                }
            };
            obs.roles.insert(node.clone(), role);
        }
    }

    /// Run one full reconciliation pass.
    ///
    /// Fails only when the observation itself cannot be gathered; stage
    /// failures are reported in the outcome.
    pub async fn reconcile_once(&mut self) -> Result<PassOutcome> {
        let started = Instant::now();
        self.ctx.store.refresh();
        let mut obs = self.observe().await?;

        let mut failure = self
            .membership
            .reconcile(&self.ctx, &mut obs)
            .await
            .err();

        if failure.is_none() {
            failure = self.bootstrap.reconcile(&self.ctx, &mut obs).await.err();
        }

        self.observe_roles(&mut obs).await;

        if failure.is_none() {
            failure = self.failover.reconcile(&self.ctx, &mut obs).await.err();
        }

        if let Some(e) = &failure {
            match e {
                HaError::NotLeader => debug!("Leadership moved during pass"),
                e if e.is_retryable() => warn!(error = %e, "Reconciliation pass incomplete"),
                e => error!(error = %e, "Reconciliation pass failed"),
            }
        }

        let chosen = obs.chosen_or_empty();
        let verdict = status::evaluate(StatusInputs {
            local: &self.ctx.local,
            started: self.ctx.local_state.is_set(LocalFlag::Started),
            ha: obs.flags.namenode_ha,
            ha_initialized: obs.flags.ha_initialized,
            clustered: obs.clustered(),
            quorum: obs.quorum.satisfied,
            coordination_ready: obs.coordination_ready,
            chosen: &chosen,
            roles: &obs.roles,
        });
        self.reporter.report(verdict.clone());

        let outcome = PassOutcome {
            verdict,
            bootstrap: BootstrapController::state(&obs, &self.ctx.local_state, &self.ctx.local),
            failover: FailoverCoordinator::state(&obs, &self.ctx.local_state),
            error: failure,
        };
        observability::record_pass(&obs, &outcome, started.elapsed());
        Ok(outcome)
    }

    async fn pass(&mut self, trigger: &str) {
        debug!(trigger, "Reconciling");
        if let Err(e) = self.reconcile_once().await {
            warn!(trigger, error = %e, "Could not observe cluster state");
        }
    }

    /// Run until `shutdown_rx` fires.
    pub async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut store_rx = self.ctx.store.subscribe();
        let mut store_open = true;
        let mut interval = tokio::time::interval(self.status_interval);

        info!(node = %self.ctx.local, "HA controller starting");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.pass("status").await;
                }
                Some(event) = self.events_rx.recv() => {
                    debug!(event = ?event, "Control event");
                    self.pass("event").await;
                }
                notification = store_rx.recv(), if store_open => {
                    match notification {
                        Ok(StoreEvent::LeadershipChanged { leader }) => {
                            info!(leader = ?leader, "Leadership changed");
                        }
                        Ok(StoreEvent::Changed { .. }) => {}
                        Err(broadcast::error::RecvError::Lagged(_)) => {
                            self.ctx.store.invalidate_all();
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            warn!("Coordination store closed its notification stream");
                            store_open = false;
                            continue;
                        }
                    }
                    self.pass("store").await;
                }
                _ = shutdown_rx.recv() => {
                    info!("HA controller shutting down");
                    break;
                }
            }
        }

        self.bootstrap.cancel_pairing();
    }
}
