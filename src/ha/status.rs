//! Health verdict reduction.
//!
//! [`evaluate`] folds the observed state into a single [`Verdict`]. It is a
//! pure function so the same inputs always produce the same string.
//! [`StatusReporter`] publishes verdicts and logs only when one changes.

use crate::types::{ChosenClusterSet, HaRole, NodeId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tokio::sync::watch;
use tracing::{info, warn};

/// Why an HA deployment is degraded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MissingReason {
    /// No other NameNode has joined.
    NameNode,
    /// The journal quorum is not satisfied.
    JournalNodes,
    /// No chosen node reports itself active.
    Active,
    /// No chosen node reports itself standby.
    Standby,
}

impl MissingReason {
    pub fn label(&self) -> &'static str {
        match self {
            MissingReason::NameNode => "NameNode",
            MissingReason::JournalNodes => "JournalNodes",
            MissingReason::Active => "active",
            MissingReason::Standby => "standby",
        }
    }
}

impl fmt::Display for MissingReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailoverMode {
    Automatic,
    Manual,
}

impl fmt::Display for FailoverMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailoverMode::Automatic => f.write_str("automatic"),
            FailoverMode::Manual => f.write_str("manual"),
        }
    }
}

/// Local role as shown in the verdict: the observed role for chosen nodes,
/// `extra` for everyone else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocalRole {
    Observed(HaRole),
    Extra,
}

impl fmt::Display for LocalRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocalRole::Observed(role) => write!(f, "{}", role),
            LocalRole::Extra => f.write_str("extra"),
        }
    }
}

/// Health verdict for one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum Verdict {
    /// The storage service is not running.
    Down,
    /// Running without HA.
    Standalone,
    /// HA eligible but the pair was never initialized.
    Pending {
        role: LocalRole,
        missing: Vec<MissingReason>,
    },
    /// HA with something missing.
    Degraded {
        role: LocalRole,
        missing: Vec<MissingReason>,
        failover: FailoverMode,
    },
    /// Fully healthy HA.
    Ha { role: LocalRole, failover: FailoverMode },
}

impl Verdict {
    /// Everything the node needs is in place.
    pub fn is_healthy(&self) -> bool {
        matches!(self, Verdict::Standalone | Verdict::Ha { .. })
    }

    pub fn is_down(&self) -> bool {
        matches!(self, Verdict::Down)
    }

    pub fn missing(&self) -> &[MissingReason] {
        match self {
            Verdict::Pending { missing, .. } | Verdict::Degraded { missing, .. } => missing,
            _ => &[],
        }
    }

    /// Short state name, used as a metric label.
    pub fn state_name(&self) -> &'static str {
        match self {
            Verdict::Down => "down",
            Verdict::Standalone => "standalone",
            Verdict::Pending { .. } => "pending",
            Verdict::Degraded { .. } => "degraded",
            Verdict::Ha { .. } => "ha",
        }
    }
}

fn join_missing(missing: &[MissingReason]) -> String {
    missing
        .iter()
        .map(MissingReason::label)
        .collect::<Vec<_>>()
        .join(" and ")
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Down => f.write_str("down"),
            Verdict::Standalone => f.write_str("standalone"),
            Verdict::Pending { role, missing } if missing.is_empty() => {
                write!(f, "pending {}", role)
            }
            Verdict::Pending { role, missing } => {
                write!(f, "pending {} (missing: {})", role, join_missing(missing))
            }
            Verdict::Degraded {
                role,
                missing,
                failover,
            } => write!(
                f,
                "HA degraded {} (missing: {}), {} fail-over",
                role,
                join_missing(missing),
                failover
            ),
            Verdict::Ha { role, failover } => write!(f, "HA {}, {} fail-over", role, failover),
        }
    }
}

/// Inputs to [`evaluate`].
#[derive(Debug, Clone, Copy)]
pub struct StatusInputs<'a> {
    pub local: &'a NodeId,
    /// The local storage service is running. Only consulted without HA.
    pub started: bool,
    /// The cluster is HA eligible.
    pub ha: bool,
    pub ha_initialized: bool,
    /// At least one other NameNode has joined.
    pub clustered: bool,
    pub quorum: bool,
    pub coordination_ready: bool,
    pub chosen: &'a ChosenClusterSet,
    /// Observed roles of the chosen nodes.
    pub roles: &'a BTreeMap<NodeId, HaRole>,
}

/// Reduce the observed state to a verdict.
pub fn evaluate(inputs: StatusInputs<'_>) -> Verdict {
    if !inputs.ha {
        return if inputs.started {
            Verdict::Standalone
        } else {
            Verdict::Down
        };
    }

    let role = if inputs.chosen.contains(inputs.local) {
        LocalRole::Observed(
            inputs
                .roles
                .get(inputs.local)
                .copied()
                .unwrap_or(HaRole::Down),
        )
    } else {
        LocalRole::Extra
    };

    let chosen_roles: Vec<HaRole> = inputs
        .chosen
        .iter()
        .filter_map(|n| inputs.roles.get(n).copied())
        .collect();
    let has_active = chosen_roles.contains(&HaRole::Active);
    let has_standby = chosen_roles.contains(&HaRole::Standby);

    let mut missing = Vec::new();
    if !inputs.clustered {
        missing.push(MissingReason::NameNode);
    }
    if !inputs.quorum {
        missing.push(MissingReason::JournalNodes);
    }
    if !has_active {
        missing.push(MissingReason::Active);
    }
    if !has_standby {
        missing.push(MissingReason::Standby);
    }

    if !inputs.ha_initialized {
        return Verdict::Pending { role, missing };
    }

    let failover = if inputs.coordination_ready {
        FailoverMode::Automatic
    } else {
        FailoverMode::Manual
    };

    if missing.is_empty() {
        Verdict::Ha { role, failover }
    } else {
        Verdict::Degraded {
            role,
            missing,
            failover,
        }
    }
}

/// Publishes verdicts, logging each change once.
pub struct StatusReporter {
    tx: watch::Sender<Verdict>,
}

impl StatusReporter {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Verdict::Down);
        Self { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<Verdict> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> Verdict {
        self.tx.borrow().clone()
    }

    /// Publish `verdict`. Returns `true` when it differs from the last one.
    pub fn report(&self, verdict: Verdict) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if *current == verdict {
                return false;
            }
            *current = verdict.clone();
            true
        });
        if changed {
            if verdict.is_healthy() {
                info!(status = %verdict, "Status changed");
            } else {
                warn!(status = %verdict, "Status changed");
            }
        }
        changed
    }
}

impl Default for StatusReporter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        local: NodeId,
        chosen: ChosenClusterSet,
        roles: BTreeMap<NodeId, HaRole>,
    }

    impl Fixture {
        fn pair(local_role: HaRole, peer_role: HaRole) -> Self {
            let mut roles = BTreeMap::new();
            roles.insert(NodeId::from("nn-0"), local_role);
            roles.insert(NodeId::from("nn-1"), peer_role);
            Self {
                local: "nn-0".into(),
                chosen: ChosenClusterSet::new(vec!["nn-0".into(), "nn-1".into()]),
                roles,
            }
        }

        fn inputs(&self) -> StatusInputs<'_> {
            StatusInputs {
                local: &self.local,
                started: true,
                ha: true,
                ha_initialized: true,
                clustered: true,
                quorum: true,
                coordination_ready: true,
                chosen: &self.chosen,
                roles: &self.roles,
            }
        }
    }

    #[test]
    fn test_down_and_standalone() {
        let fx = Fixture::pair(HaRole::Active, HaRole::Standby);
        let mut inputs = fx.inputs();
        inputs.ha = false;
        assert_eq!(evaluate(inputs).to_string(), "standalone");

        inputs.started = false;
        let verdict = evaluate(inputs);
        assert!(verdict.is_down());
        assert_eq!(verdict.to_string(), "down");
    }

    #[test]
    fn test_stopped_extra_node_reports_ha() {
        let mut fx = Fixture::pair(HaRole::Active, HaRole::Standby);
        fx.local = "nn-2".into();
        let mut inputs = fx.inputs();
        inputs.started = false;
        inputs.coordination_ready = false;
        let verdict = evaluate(inputs);
        assert!(verdict.is_healthy());
        assert_eq!(verdict.to_string(), "HA extra, manual fail-over");
    }

    #[test]
    fn test_healthy_pair() {
        let fx = Fixture::pair(HaRole::Active, HaRole::Standby);
        let verdict = evaluate(fx.inputs());
        assert!(verdict.is_healthy());
        assert_eq!(verdict.to_string(), "HA active, automatic fail-over");

        let mut inputs = fx.inputs();
        inputs.coordination_ready = false;
        assert_eq!(evaluate(inputs).to_string(), "HA active, manual fail-over");
    }

    #[test]
    fn test_missing_standby_without_coordination() {
        let fx = Fixture::pair(HaRole::Active, HaRole::Down);
        let mut inputs = fx.inputs();
        inputs.coordination_ready = false;
        assert_eq!(
            evaluate(inputs).to_string(),
            "HA degraded active (missing: standby), manual fail-over"
        );
    }

    #[test]
    fn test_missing_reasons_are_joined_in_order() {
        let fx = Fixture::pair(HaRole::Standby, HaRole::Down);
        let mut inputs = fx.inputs();
        inputs.quorum = false;
        let verdict = evaluate(inputs);
        assert_eq!(
            verdict.missing(),
            &[MissingReason::JournalNodes, MissingReason::Active]
        );
        assert_eq!(
            verdict.to_string(),
            "HA degraded standby (missing: JournalNodes and active), automatic fail-over"
        );
    }

    #[test]
    fn test_unchosen_node_is_extra() {
        let mut fx = Fixture::pair(HaRole::Active, HaRole::Standby);
        fx.local = "nn-2".into();
        assert_eq!(evaluate(fx.inputs()).to_string(), "HA extra, automatic fail-over");
    }

    #[test]
    fn test_chosen_node_without_role_is_down() {
        let mut fx = Fixture::pair(HaRole::Active, HaRole::Standby);
        fx.roles.remove(&NodeId::from("nn-0"));
        assert_eq!(
            evaluate(fx.inputs()).to_string(),
            "HA degraded down (missing: active), automatic fail-over"
        );
    }

    #[test]
    fn test_pending_before_initialization() {
        let fx = Fixture::pair(HaRole::Down, HaRole::Down);
        let mut inputs = fx.inputs();
        inputs.ha_initialized = false;
        assert_eq!(
            evaluate(inputs).to_string(),
            "pending down (missing: active and standby)"
        );
    }

    #[test]
    fn test_evaluate_is_pure() {
        let fx = Fixture::pair(HaRole::Active, HaRole::Down);
        assert_eq!(evaluate(fx.inputs()), evaluate(fx.inputs()));
    }

    #[test]
    fn test_reporter_publishes_changes_once() {
        let reporter = StatusReporter::new();
        let rx = reporter.subscribe();
        assert!(!reporter.report(Verdict::Down));
        assert!(reporter.report(Verdict::Standalone));
        assert!(!reporter.report(Verdict::Standalone));
        assert_eq!(*rx.borrow(), Verdict::Standalone);
    }
}
