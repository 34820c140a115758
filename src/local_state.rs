//! Node-local durable flags and change fingerprints.
//!
//! These survive process restarts but are never shared with other nodes.
//! Fingerprints are SHA-256 digests of the JSON encoding of a value; comparing
//! them is how the controller decides whether a reconfigure or restart is
//! needed, so transient relation data that re-serializes identically never
//! causes churn.

use crate::error::Result;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

const STATE_FILE: &str = "local-state.json";

/// Node-local markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocalFlag {
    /// The storage service is running.
    Started,
    /// The standalone namespace was formatted.
    Formatted,
    /// `initSharedEditLogs` succeeded on this node.
    SharedEditsInitialized,
    /// `bootstrapStandby` succeeded on this node.
    StandbyBootstrapped,
    /// This node finished its HA bootstrap (either side).
    BootstrapCompleted,
    /// This node told its peers the standby is ready.
    StandbyReadySignalled,
    /// The local failover controller process is running.
    ZkStarted,
    /// Last observed coordination-service readiness.
    CoordinationReady,
}

impl LocalFlag {
    pub fn key(&self) -> &'static str {
        match self {
            LocalFlag::Started => "namenode.started",
            LocalFlag::Formatted => "namenode.formatted",
            LocalFlag::SharedEditsInitialized => "namenode.shared-edits.init",
            LocalFlag::StandbyBootstrapped => "namenode.standby.bootstrapped",
            LocalFlag::BootstrapCompleted => "namenode.ha.bootstrapped",
            LocalFlag::StandbyReadySignalled => "namenode.standby.ready-sent",
            LocalFlag::ZkStarted => "namenode.zk.started",
            LocalFlag::CoordinationReady => "zookeeper.ready.last",
        }
    }
}

impl fmt::Display for LocalFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StateData {
    #[serde(default)]
    flags: BTreeSet<String>,
    #[serde(default)]
    fingerprints: BTreeMap<String, String>,
}

/// Durable per-node state.
pub struct LocalState {
    path: Option<PathBuf>,
    data: Mutex<StateData>,
}

impl LocalState {
    /// Open (or create) the state file under `dir`.
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(STATE_FILE);
        let data = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            serde_json::from_str(&content)?
        } else {
            StateData::default()
        };
        debug!(path = %path.display(), flags = data.flags.len(), "Local state loaded");
        Ok(Self {
            path: Some(path),
            data: Mutex::new(data),
        })
    }

    /// Non-durable state, for tests and dry runs.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            data: Mutex::new(StateData::default()),
        }
    }

    pub fn is_set(&self, flag: LocalFlag) -> bool {
        self.data.lock().flags.contains(flag.key())
    }

    /// Set or clear a flag. Returns `true` when the value changed.
    pub fn set(&self, flag: LocalFlag, on: bool) -> Result<bool> {
        let mut data = self.data.lock();
        let changed = if on {
            data.flags.insert(flag.key().to_string())
        } else {
            data.flags.remove(flag.key())
        };
        if changed {
            debug!(flag = %flag, on, "Local flag changed");
            self.persist(&data)?;
        }
        Ok(changed)
    }

    /// Whether `value` differs from the fingerprint recorded under `key` (or
    /// none was recorded). Compares without recording. Pair with [`LocalState::record`] once the
    /// change has been applied, so a failed apply is retried.
    pub fn is_changed<T: Serialize>(&self, key: &str, value: &T) -> Result<bool> {
        let digest = fingerprint(value)?;
        Ok(self.data.lock().fingerprints.get(key) != Some(&digest))
    }

    pub fn record<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let digest = fingerprint(value)?;
        let mut data = self.data.lock();
        if data.fingerprints.get(key) == Some(&digest) {
            return Ok(());
        }
        data.fingerprints.insert(key.to_string(), digest);
        self.persist(&data)
    }

    fn persist(&self, data: &StateData) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(data)?)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

/// SHA-256 fingerprint of a value's JSON encoding.
pub fn fingerprint<T: Serialize>(value: &T) -> Result<String> {
    let encoded = serde_json::to_vec(value)?;
    let mut hasher = Sha256::new();
    hasher.update(&encoded);
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_flags_survive_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let state = LocalState::open(dir.path()).unwrap();
            assert!(state.set(LocalFlag::Started, true).unwrap());
            assert!(!state.set(LocalFlag::Started, true).unwrap());
        }
        let state = LocalState::open(dir.path()).unwrap();
        assert!(state.is_set(LocalFlag::Started));
        assert!(!state.is_set(LocalFlag::ZkStarted));
    }

    #[test]
    fn test_recorded_value_is_unchanged() {
        let state = LocalState::in_memory();
        let nodes = vec!["nn-0", "nn-1"];
        state.record("cluster-nodes", &nodes).unwrap();
        assert!(!state.is_changed("cluster-nodes", &nodes).unwrap());
        assert!(state
            .is_changed("cluster-nodes", &vec!["nn-0", "nn-2"])
            .unwrap());
    }

    #[test]
    fn test_is_changed_does_not_record() {
        let state = LocalState::in_memory();
        assert!(state.is_changed("zk", &vec!["zk-0"]).unwrap());
        assert!(state.is_changed("zk", &vec!["zk-0"]).unwrap());
        state.record("zk", &vec!["zk-0"]).unwrap();
        assert!(!state.is_changed("zk", &vec!["zk-0"]).unwrap());
    }

    #[test]
    fn test_fingerprints_survive_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let state = LocalState::open(dir.path()).unwrap();
            state.record("jn", &(vec!["jn-0"], 8485)).unwrap();
        }
        let state = LocalState::open(dir.path()).unwrap();
        assert!(!state.is_changed("jn", &(vec!["jn-0"], 8485)).unwrap());
    }

    #[test]
    fn test_clear_flag() {
        let state = LocalState::in_memory();
        state.set(LocalFlag::ZkStarted, true).unwrap();
        assert!(state.set(LocalFlag::ZkStarted, false).unwrap());
        assert!(!state.is_set(LocalFlag::ZkStarted));
    }
}
