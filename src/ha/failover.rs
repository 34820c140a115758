//! Automatic-failover coordination and manual activation.
//!
//! While the coordination service is ready, the failover controller is
//! configured against its members, the leader formats the backing store
//! once, and each chosen node starts its local failover process once the
//! standby is ready. When the service goes away the local process is stopped
//! and the leader clears `zk-formatted` on the ready-to-unready transition so
//! the store is formatted again on return.
//!
//! Without a coordination service the leader picks the active NameNode
//! itself, at most while no chosen node already reports active.

use super::{HaContext, Observation};
use crate::error::Result;
use crate::local_state::{LocalFlag, LocalState};
use crate::observability;
use crate::store::HaFlag;
use crate::types::{FailoverState, HaRole, NodeId};
use tracing::{debug, info};

const COORDINATION_KEY: &str = "namenode.zk.members";

#[derive(Debug, Default)]
pub struct FailoverCoordinator;

impl FailoverCoordinator {
    pub fn new() -> Self {
        Self
    }

    /// Local failover state.
    pub fn state(obs: &Observation, ls: &LocalState) -> FailoverState {
        if ls.is_set(LocalFlag::ZkStarted) {
            FailoverState::Started
        } else if obs.flags.zk_formatted {
            FailoverState::Formatted
        } else {
            FailoverState::NotConfigured
        }
    }

    pub fn should_format(obs: &Observation) -> bool {
        obs.is_leader && obs.flags.ha_initialized && obs.coordination_ready && !obs.flags.zk_formatted
    }

    pub fn should_start(obs: &Observation, ls: &LocalState, local: &NodeId) -> bool {
        obs.coordination_ready
            && obs.flags.zk_formatted
            && obs.standby_ready
            && obs.is_chosen(local)
            && ls.is_set(LocalFlag::BootstrapCompleted)
            && !ls.is_set(LocalFlag::ZkStarted)
    }

    /// Pick the node to activate when no failover controller is available.
    ///
    /// Returns `None` when activation is not due: some chosen node already
    /// reports active, no chosen node is up as standby, or the role of some
    /// chosen node could not be determined. A node whose query failed may
    /// still be serving as active.
    pub fn activation_target(obs: &Observation, local: &NodeId) -> Option<NodeId> {
        if !obs.is_leader
            || !obs.flags.ha_initialized
            || obs.coordination_ready
            || !obs.standby_ready
        {
            return None;
        }
        let chosen = obs.chosen.as_ref()?;
        let mut roles = Vec::with_capacity(chosen.len());
        for node in chosen.iter() {
            match obs.roles.get(node) {
                Some(HaRole::Unknown) | None => {
                    debug!(node = %node, "Role not observed, holding activation");
                    return None;
                }
                Some(role) => roles.push(*role),
            }
        }
        if roles.contains(&HaRole::Active) || !roles.contains(&HaRole::Standby) {
            return None;
        }
        if chosen.contains(local) && obs.roles.get(local) == Some(&HaRole::Standby) {
            return Some(local.clone());
        }
        chosen
            .iter()
            .find(|n| obs.roles.get(*n) == Some(&HaRole::Standby))
            .cloned()
    }

    /// Apply whichever transition is due.
    pub async fn reconcile(&self, ctx: &HaContext, obs: &mut Observation) -> Result<FailoverState> {
        let ls = &ctx.local_state;
        let was_ready = ls.is_set(LocalFlag::CoordinationReady);

        if !obs.coordination_ready {
            if ls.is_set(LocalFlag::ZkStarted) {
                info!("Coordination service unavailable, stopping failover controller");
                ctx.service.stop_failover_coordinator().await?;
                ls.set(LocalFlag::ZkStarted, false)?;
            }
            if was_ready && obs.is_leader && obs.flags.zk_formatted {
                ctx.store.clear_flag(HaFlag::ZkFormatted).await?;
                obs.flags.zk_formatted = false;
            }
            ls.set(LocalFlag::CoordinationReady, false)?;

            self.ensure_active(ctx, obs).await?;
            return Ok(Self::state(obs, ls));
        }

        if !was_ready {
            debug!(members = obs.coordination_members.len(), "Coordination service ready");
            ls.set(LocalFlag::CoordinationReady, true)?;
        }

        if !obs.flags.ha_initialized {
            return Ok(Self::state(obs, ls));
        }

        self.update_coordinator_config(ctx, obs).await?;

        if Self::should_format(obs) {
            info!("Formatting failover coordinator state");
            ctx.service.format_failover_coordinator().await?;
            ctx.store.set_flag(HaFlag::ZkFormatted).await?;
            obs.flags.zk_formatted = true;
        }

        if Self::should_start(obs, ls, &ctx.local) {
            info!("Enabling automatic failover");
            if ls.is_set(LocalFlag::Started) {
                ctx.service.restart().await?;
                observability::record_restart("failover");
            } else {
                ctx.service.start().await?;
                ls.set(LocalFlag::Started, true)?;
            }
            ctx.service.start_failover_coordinator().await?;
            ls.set(LocalFlag::ZkStarted, true)?;
        }

        Ok(Self::state(obs, ls))
    }

    /// Reconfigure the failover controller when the member list changed,
    /// restarting it when it is running.
    async fn update_coordinator_config(&self, ctx: &HaContext, obs: &Observation) -> Result<()> {
        let ls = &ctx.local_state;
        let members = &obs.coordination_members;
        if members.is_empty() || !ls.is_changed(COORDINATION_KEY, members)? {
            return Ok(());
        }

        info!(members = ?members, "Configuring failover coordinator");
        ctx.service.configure_failover_coordinator(members).await?;
        if ls.is_set(LocalFlag::ZkStarted) {
            ctx.service.restart_failover_coordinator().await?;
            observability::record_restart("failover_coordinator");
        }
        ls.record(COORDINATION_KEY, members)?;
        Ok(())
    }

    async fn ensure_active(&self, ctx: &HaContext, obs: &mut Observation) -> Result<()> {
        let Some(target) = Self::activation_target(obs, &ctx.local) else {
            return Ok(());
        };
        info!(node = %target, "No active NameNode, activating manually");
        ctx.service.transition_to_active(&target).await?;
        obs.roles.insert(target, HaRole::Active);
        ctx.store.set_flag(HaFlag::ClusterActivated).await?;
        obs.flags.cluster_activated = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quorum::QuorumStatus;
    use crate::types::{ChosenClusterSet, JournalPeerSet};
    use std::collections::BTreeMap;

    fn observation() -> Observation {
        let mut roles = BTreeMap::new();
        roles.insert(NodeId::from("nn-0"), HaRole::Standby);
        roles.insert(NodeId::from("nn-1"), HaRole::Standby);
        Observation {
            is_leader: true,
            peers: vec!["nn-1".into()],
            journal: JournalPeerSet::new(vec!["jn-0".into()], 8485),
            quorum: QuorumStatus {
                joined: 1,
                threshold: 1,
                satisfied: true,
            },
            coordination_ready: false,
            coordination_members: Vec::new(),
            standby_ready: true,
            flags: super::super::HaFlags {
                namenode_ha: true,
                ha_initialized: true,
                ..Default::default()
            },
            chosen: Some(ChosenClusterSet::new(vec!["nn-0".into(), "nn-1".into()])),
            shared_edits_owner: Some("nn-0".into()),
            roles,
        }
    }

    #[test]
    fn test_activation_prefers_local() {
        let obs = observation();
        assert_eq!(
            FailoverCoordinator::activation_target(&obs, &"nn-0".into()),
            Some("nn-0".into())
        );
    }

    #[test]
    fn test_activation_falls_back_to_first_standby() {
        let mut obs = observation();
        obs.roles.insert("nn-0".into(), HaRole::Down);
        assert_eq!(
            FailoverCoordinator::activation_target(&obs, &"nn-0".into()),
            Some("nn-1".into())
        );
    }

    #[test]
    fn test_no_activation_with_existing_active() {
        let mut obs = observation();
        obs.roles.insert("nn-1".into(), HaRole::Active);
        assert_eq!(FailoverCoordinator::activation_target(&obs, &"nn-0".into()), None);
    }

    #[test]
    fn test_no_activation_while_a_role_is_unknown() {
        let mut obs = observation();
        obs.roles.insert("nn-1".into(), HaRole::Unknown);
        assert_eq!(FailoverCoordinator::activation_target(&obs, &"nn-0".into()), None);

        obs.roles.remove(&NodeId::from("nn-1"));
        assert_eq!(FailoverCoordinator::activation_target(&obs, &"nn-0".into()), None);
    }

    #[test]
    fn test_no_activation_with_coordination() {
        let mut obs = observation();
        obs.coordination_ready = true;
        assert_eq!(FailoverCoordinator::activation_target(&obs, &"nn-0".into()), None);
    }

    #[test]
    fn test_followers_never_activate() {
        let mut obs = observation();
        obs.is_leader = false;
        assert_eq!(FailoverCoordinator::activation_target(&obs, &"nn-0".into()), None);
    }

    #[test]
    fn test_start_requires_standby_ready() {
        let ls = LocalState::in_memory();
        ls.set(LocalFlag::BootstrapCompleted, true).unwrap();
        let mut obs = observation();
        obs.coordination_ready = true;
        obs.flags.zk_formatted = true;
        obs.standby_ready = false;
        assert!(!FailoverCoordinator::should_start(&obs, &ls, &"nn-0".into()));
        obs.standby_ready = true;
        assert!(FailoverCoordinator::should_start(&obs, &ls, &"nn-0".into()));
        assert!(!FailoverCoordinator::should_start(&obs, &ls, &"nn-2".into()));
    }

    #[test]
    fn test_state_progression() {
        let ls = LocalState::in_memory();
        let mut obs = observation();
        assert_eq!(FailoverCoordinator::state(&obs, &ls), FailoverState::NotConfigured);
        obs.flags.zk_formatted = true;
        assert_eq!(FailoverCoordinator::state(&obs, &ls), FailoverState::Formatted);
        ls.set(LocalFlag::ZkStarted, true).unwrap();
        assert_eq!(FailoverCoordinator::state(&obs, &ls), FailoverState::Started);
    }
}
