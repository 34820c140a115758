//! Core types for the NameNode HA controller.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum size of the chosen HA pair.
pub const HA_PAIR_SIZE: usize = 2;

/// Stable, hostname-derived identity of a cluster node.
///
/// Unit names such as `namenode/0` are not valid hostnames, so the slash is
/// replaced: `namenode/0` becomes `namenode-0`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Derive the identity from a unit name (`service/N`).
    pub fn from_unit_name(unit: &str) -> Self {
        Self(unit.replace('/', "-"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Observed HA role of a NameNode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HaRole {
    Active,
    Standby,
    Down,
    Unknown,
}

impl HaRole {
    /// Parse the output of a service-state query.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => HaRole::Active,
            "standby" => HaRole::Standby,
            "" | "down" => HaRole::Down,
            _ => HaRole::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HaRole::Active => "active",
            HaRole::Standby => "standby",
            HaRole::Down => "down",
            HaRole::Unknown => "unknown",
        }
    }
}

impl fmt::Display for HaRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a node belongs to the chosen HA pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Membership {
    Chosen,
    Extra,
}

/// A cluster node as seen by the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterNode {
    pub id: NodeId,
    pub reachable: bool,
    pub role: HaRole,
    pub membership: Membership,
}

/// The authoritative, ordered HA pair (at most two members).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChosenClusterSet(Vec<NodeId>);

impl ChosenClusterSet {
    /// Build a chosen set, dropping duplicates and truncating to the pair size.
    pub fn new(nodes: impl IntoIterator<Item = NodeId>) -> Self {
        let mut members: Vec<NodeId> = Vec::with_capacity(HA_PAIR_SIZE);
        for node in nodes {
            if members.len() == HA_PAIR_SIZE {
                break;
            }
            if !members.contains(&node) {
                members.push(node);
            }
        }
        Self(members)
    }

    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn members(&self) -> &[NodeId] {
        &self.0
    }

    pub fn contains(&self, node: &NodeId) -> bool {
        self.0.contains(node)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True once both members of the pair are known.
    pub fn is_complete(&self) -> bool {
        self.0.len() == HA_PAIR_SIZE
    }

    pub fn iter(&self) -> impl Iterator<Item = &NodeId> {
        self.0.iter()
    }

    pub fn membership_of(&self, node: &NodeId) -> Membership {
        if self.contains(node) {
            Membership::Chosen
        } else {
            Membership::Extra
        }
    }
}

/// Joined journal peers plus their shared port.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalPeerSet {
    pub nodes: Vec<NodeId>,
    pub port: u16,
}

impl JournalPeerSet {
    /// Create a journal set with nodes in sorted order.
    pub fn new(mut nodes: Vec<NodeId>, port: u16) -> Self {
        nodes.sort();
        nodes.dedup();
        Self { nodes, port }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// `qjournal://` URI for the shared edits directory.
    pub fn shared_edits_uri(&self, nameservice: &str) -> String {
        let hosts: Vec<String> = self
            .nodes
            .iter()
            .map(|n| format!("{}:{}", n, self.port))
            .collect();
        format!("qjournal://{}/{}", hosts.join(";"), nameservice)
    }
}

/// A member of the external coordination (ZooKeeper) service.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CoordinationMember {
    pub host: String,
    pub port: u16,
}

impl CoordinationMember {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for CoordinationMember {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Per-node HA bootstrap state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BootstrapState {
    Uninitialized,
    ActiveBootstrapping,
    StandbyBootstrapping,
    Initialized,
}

/// Automatic-failover lifecycle as seen from one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailoverState {
    NotConfigured,
    Formatted,
    Started,
}

impl FailoverState {
    /// Numeric encoding used for the metrics gauge.
    pub fn as_gauge(&self) -> f64 {
        match self {
            FailoverState::NotConfigured => 0.0,
            FailoverState::Formatted => 1.0,
            FailoverState::Started => 2.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_from_unit_name() {
        assert_eq!(NodeId::from_unit_name("namenode/0").as_str(), "namenode-0");
        assert_eq!(NodeId::from_unit_name("nn-1").as_str(), "nn-1");
    }

    #[test]
    fn test_chosen_set_caps_at_pair() {
        let set = ChosenClusterSet::new(vec!["a".into(), "b".into(), "c".into()]);
        assert_eq!(set.len(), 2);
        assert!(set.is_complete());
        assert!(!set.contains(&"c".into()));
    }

    #[test]
    fn test_chosen_set_drops_duplicates() {
        let set = ChosenClusterSet::new(vec!["a".into(), "a".into(), "b".into()]);
        assert_eq!(set.members(), &[NodeId::from("a"), NodeId::from("b")]);
    }

    #[test]
    fn test_chosen_set_json_is_plain_list() {
        let set = ChosenClusterSet::new(vec!["nn-0".into(), "nn-1".into()]);
        let json = serde_json::to_string(&set).unwrap();
        assert_eq!(json, r#"["nn-0","nn-1"]"#);
    }

    #[test]
    fn test_role_parse() {
        assert_eq!(HaRole::parse("active\n"), HaRole::Active);
        assert_eq!(HaRole::parse("Standby"), HaRole::Standby);
        assert_eq!(HaRole::parse(""), HaRole::Down);
        assert_eq!(HaRole::parse("initializing"), HaRole::Unknown);
    }

    #[test]
    fn test_shared_edits_uri() {
        let jn = JournalPeerSet::new(vec!["jn-1".into(), "jn-0".into()], 8485);
        assert_eq!(
            jn.shared_edits_uri("hdfs"),
            "qjournal://jn-0:8485;jn-1:8485/hdfs"
        );
    }
}
