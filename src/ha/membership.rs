//! Chosen-pair selection.
//!
//! Survivors of the current chosen set are kept; only when fewer than two
//! survive are newly joined, reachable nodes promoted. The result never holds
//! more than two members, and re-running against unchanged inputs returns the
//! same set.

use super::{HaContext, Observation};
use crate::error::Result;
use crate::observability;
use crate::probe::Prober;
use crate::store::HaStore;
use crate::types::{ChosenClusterSet, NodeId, HA_PAIR_SIZE};
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Fingerprint key for the last published peer list.
const PUBLISHED_KEY: &str = "namenode.peer-list.published";

/// Compute the next chosen set.
///
/// `joined` holds the joined peers excluding `local`; the local node is
/// always considered present and viable without probing. Candidates are
/// probed in sorted order.
pub async fn next_chosen_set(
    chosen: &ChosenClusterSet,
    joined: &[NodeId],
    local: &NodeId,
    prober: &dyn Prober,
    port: u16,
) -> ChosenClusterSet {
    let mut current: BTreeSet<&NodeId> = joined.iter().collect();
    current.insert(local);

    let remaining: BTreeSet<&NodeId> = chosen.iter().filter(|n| current.contains(n)).collect();
    if remaining.len() >= HA_PAIR_SIZE {
        return chosen.clone();
    }

    let mut viable = Vec::new();
    for candidate in current.iter().filter(|n| !chosen.contains(n)) {
        if *candidate == local || prober.probe(candidate, port).await {
            viable.push((*candidate).clone());
        } else {
            debug!(node = %candidate, "Candidate unreachable, not promoted");
        }
    }

    if viable.is_empty() {
        return chosen.clone();
    }

    // BTreeSet iteration is already sorted.
    ChosenClusterSet::new(remaining.into_iter().cloned().chain(viable))
}

/// Keeps the persisted chosen set in line with the joined peers.
///
/// Only the leader persists; it does so only once the pair was initialized,
/// since the initial pair is seeded by the active bootstrap.
#[derive(Debug, Default)]
pub struct MembershipSelector;

impl MembershipSelector {
    pub fn new() -> Self {
        Self
    }

    /// Whether this pass may rewrite the chosen set.
    pub fn should_select(obs: &Observation) -> bool {
        obs.is_leader && obs.flags.ha_initialized && obs.chosen.is_some()
    }

    /// Run the selector. Returns `true` when the chosen set was rewritten.
    pub async fn reconcile(&self, ctx: &HaContext, obs: &mut Observation) -> Result<bool> {
        let mut changed = false;

        if Self::should_select(obs) {
            let current = obs.chosen_or_empty();
            let next = next_chosen_set(
                &current,
                &obs.peers,
                &ctx.local,
                ctx.prober.as_ref(),
                ctx.namenode_port,
            )
            .await;

            if next != current {
                info!(
                    from = ?current.members(),
                    to = ?next.members(),
                    "Promoting NameNodes into the chosen set"
                );
                changed = ctx.store.set_chosen_set(&next).await?;
                if changed {
                    observability::record_chosen_set_write();
                }
                obs.chosen = Some(next);
            }
        }

        publish_peer_list(ctx, obs).await?;
        Ok(changed)
    }
}

/// Send the chosen set to relation consumers when it changed since the last
/// successful publication.
async fn publish_peer_list(ctx: &HaContext, obs: &Observation) -> Result<()> {
    let Some(chosen) = obs.chosen.as_ref().filter(|c| !c.is_empty()) else {
        return Ok(());
    };
    if !obs.flags.ha_initialized || !ctx.local_state.is_changed(PUBLISHED_KEY, chosen)? {
        return Ok(());
    }
    ctx.peers.send_peer_list(chosen.members()).await?;
    ctx.local_state.record(PUBLISHED_KEY, chosen)?;
    Ok(())
}

/// Seed the initial pair during the active bootstrap (leader only).
pub async fn seed_pair(
    store: &HaStore,
    active: &NodeId,
    standby: &NodeId,
) -> Result<ChosenClusterSet> {
    let pair = ChosenClusterSet::new(vec![active.clone(), standby.clone()]);
    if store.set_chosen_set(&pair).await? {
        observability::record_chosen_set_write();
        info!(chosen = ?pair.members(), "Initial pair seeded");
    }
    Ok(pair)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashSet;

    struct SetProber(HashSet<NodeId>);

    impl SetProber {
        fn reachable(nodes: &[&str]) -> Self {
            Self(nodes.iter().map(|n| NodeId::from(*n)).collect())
        }
    }

    #[async_trait]
    impl Prober for SetProber {
        async fn probe(&self, node: &NodeId, _port: u16) -> bool {
            self.0.contains(node)
        }
    }

    fn ids(nodes: &[&str]) -> Vec<NodeId> {
        nodes.iter().map(|n| NodeId::from(*n)).collect()
    }

    #[tokio::test]
    async fn test_replaces_departed_member() {
        // A and B chosen, B leaves, C joins reachable, D joins unreachable.
        let chosen = ChosenClusterSet::new(ids(&["a", "b"]));
        let prober = SetProber::reachable(&["c"]);
        let next = next_chosen_set(&chosen, &ids(&["c", "d"]), &"a".into(), &prober, 8020).await;
        assert_eq!(next.members(), ids(&["a", "c"]).as_slice());
    }

    #[tokio::test]
    async fn test_full_pair_is_kept() {
        let chosen = ChosenClusterSet::new(ids(&["b", "a"]));
        let prober = SetProber::reachable(&["c", "d"]);
        let next = next_chosen_set(&chosen, &ids(&["b", "c", "d"]), &"a".into(), &prober, 8020).await;
        assert_eq!(next, chosen);
    }

    #[tokio::test]
    async fn test_unreachable_candidates_are_skipped() {
        let chosen = ChosenClusterSet::new(ids(&["a", "b"]));
        let prober = SetProber::reachable(&["d"]);
        let next = next_chosen_set(&chosen, &ids(&["c", "d"]), &"a".into(), &prober, 8020).await;
        assert_eq!(next.members(), ids(&["a", "d"]).as_slice());
    }

    #[tokio::test]
    async fn test_no_viable_candidate_keeps_set() {
        let chosen = ChosenClusterSet::new(ids(&["a", "b"]));
        let prober = SetProber::reachable(&[]);
        let next = next_chosen_set(&chosen, &ids(&["c"]), &"a".into(), &prober, 8020).await;
        assert_eq!(next, chosen);
    }

    #[tokio::test]
    async fn test_local_node_is_viable_without_probe() {
        let chosen = ChosenClusterSet::new(ids(&["b"]));
        let prober = SetProber::reachable(&[]);
        let next = next_chosen_set(&chosen, &ids(&["b"]), &"a".into(), &prober, 8020).await;
        assert_eq!(next.members(), ids(&["b", "a"]).as_slice());
    }

    #[tokio::test]
    async fn test_selection_is_idempotent() {
        let chosen = ChosenClusterSet::new(ids(&["a", "b"]));
        let prober = SetProber::reachable(&["c", "d"]);
        let joined = ids(&["c", "d"]);
        let once = next_chosen_set(&chosen, &joined, &"a".into(), &prober, 8020).await;
        let twice = next_chosen_set(&once, &joined, &"a".into(), &prober, 8020).await;
        assert_eq!(once, twice);
        assert_eq!(once.len(), 2);
    }
}
