//! Configuration module for the HA controller.

use crate::error::{HaError, Result};
use crate::types::{CoordinationMember, NodeId};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration for a controller instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HaConfig {
    /// Node configuration.
    pub node: NodeConfig,
    /// Storage service ports.
    #[serde(default)]
    pub ports: PortConfig,
    /// Journal quorum configuration.
    #[serde(default)]
    pub journal: JournalConfig,
    /// Peer probing configuration.
    #[serde(default)]
    pub probe: ProbeConfig,
    /// Control loop configuration.
    #[serde(default)]
    pub control: ControlConfig,
    /// Storage service command configuration.
    #[serde(default)]
    pub service: ServiceConfig,
    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,
    /// Static seed data for single-host deployments.
    #[serde(default)]
    pub bootstrap: BootstrapSeed,
}

impl HaConfig {
    /// Load configuration from a file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| HaError::Config(format!("Failed to read config file: {}", e)))?;

        let config: Self = serde_json::from_str(&content)
            .map_err(|e| HaError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if self.node.unit_name.trim().is_empty() {
            return Err(HaError::InvalidConfig {
                field: "node.unit_name".to_string(),
                reason: "Unit name must not be empty".to_string(),
            });
        }

        if self.journal.quorum_size == 0 {
            return Err(HaError::InvalidConfig {
                field: "journal.quorum_size".to_string(),
                reason: "Quorum size must be at least 1".to_string(),
            });
        }

        if self.ports.namenode == 0 {
            return Err(HaError::InvalidConfig {
                field: "ports.namenode".to_string(),
                reason: "NameNode port must be non-zero".to_string(),
            });
        }

        if self.probe.poll_interval.is_zero() {
            return Err(HaError::InvalidConfig {
                field: "probe.poll_interval".to_string(),
                reason: "Poll interval must be non-zero".to_string(),
            });
        }

        if self.probe.pairing_timeout < self.probe.poll_interval {
            return Err(HaError::InvalidConfig {
                field: "probe.pairing_timeout".to_string(),
                reason: "Pairing timeout must be at least one poll interval".to_string(),
            });
        }

        if self.control.status_interval.is_zero() {
            return Err(HaError::InvalidConfig {
                field: "control.status_interval".to_string(),
                reason: "Status interval must be non-zero".to_string(),
            });
        }

        Ok(())
    }

    /// Create a minimal development configuration.
    pub fn development() -> Self {
        Self {
            node: NodeConfig {
                unit_name: "namenode/0".to_string(),
                state_dir: PathBuf::from("/tmp/namenode-ha/state"),
            },
            probe: ProbeConfig {
                connect_timeout: Duration::from_millis(500),
                poll_interval: Duration::from_millis(500),
                pairing_timeout: Duration::from_secs(30),
            },
            service: ServiceConfig {
                conf_dir: PathBuf::from("/tmp/namenode-ha/conf"),
                ..Default::default()
            },
            observability: ObservabilityConfig {
                metrics_enabled: false,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Local node identity derived from the unit name.
    pub fn local_id(&self) -> NodeId {
        NodeId::from_unit_name(&self.node.unit_name)
    }
}

/// Node-specific configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Unit name (`service/N`); the local identity is derived from it.
    pub unit_name: String,
    /// Directory holding node-local durable flags.
    pub state_dir: PathBuf,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            unit_name: "namenode/0".to_string(),
            state_dir: PathBuf::from("/var/lib/namenode-ha"),
        }
    }
}

/// Storage service ports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortConfig {
    /// NameNode RPC port, also used for reachability probes.
    pub namenode: u16,
    /// WebHDFS port.
    pub webhdfs: u16,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            namenode: 8020,
            webhdfs: 50070,
        }
    }
}

/// Journal quorum configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalConfig {
    /// Minimum number of joined journal peers.
    pub quorum_size: usize,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self { quorum_size: 3 }
    }
}

/// Peer probing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Timeout for a single TCP connect.
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Delay between polls while waiting for a peer.
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Upper bound on the initial pairing wait.
    #[serde(with = "humantime_serde")]
    pub pairing_timeout: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(2),
            poll_interval: Duration::from_secs(2),
            pairing_timeout: Duration::from_secs(120),
        }
    }
}

/// Control loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    /// Fixed interval for the scheduled status pass.
    #[serde(with = "humantime_serde")]
    pub status_interval: Duration,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            status_interval: Duration::from_secs(60),
        }
    }
}

/// Storage service command configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Path to the `hdfs` command.
    pub hdfs_bin: PathBuf,
    /// Path to the daemon control script.
    pub daemon_bin: PathBuf,
    /// Directory where the HA site configuration is written.
    pub conf_dir: PathBuf,
    /// Logical nameservice ID.
    pub nameservice: String,
    /// Timeout for a single external command.
    #[serde(with = "humantime_serde")]
    pub command_timeout: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            hdfs_bin: PathBuf::from("/usr/lib/hadoop/bin/hdfs"),
            daemon_bin: PathBuf::from("/usr/lib/hadoop/sbin/hadoop-daemon.sh"),
            conf_dir: PathBuf::from("/etc/hadoop/conf"),
            nameservice: "hdfs".to_string(),
            command_timeout: Duration::from_secs(300),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Enable Prometheus metrics and the status endpoints.
    pub metrics_enabled: bool,
    /// Metrics bind address.
    pub metrics_addr: SocketAddr,
    /// Log level.
    pub log_level: String,
    /// Enable JSON logging.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: true,
            metrics_addr: SocketAddr::from(([0, 0, 0, 0], 9464)),
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

/// Seed data used by the binary to populate the in-memory directories.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BootstrapSeed {
    /// Whether this node holds leadership.
    #[serde(default)]
    pub leader: bool,
    /// Joined NameNode peers (excluding the local node).
    #[serde(default)]
    pub peers: Vec<String>,
    /// Joined journal nodes.
    #[serde(default)]
    pub journal_nodes: Vec<String>,
    /// Journal node port.
    #[serde(default = "default_journal_port")]
    pub journal_port: u16,
    /// Coordination service members (`host:port`).
    #[serde(default)]
    pub coordination_nodes: Vec<String>,
}

fn default_journal_port() -> u16 {
    8485
}

/// Port assumed for coordination members listed without one.
const DEFAULT_COORDINATION_PORT: u16 = 2181;

impl BootstrapSeed {
    /// Parse `coordination_nodes` entries (`host` or `host:port`).
    pub fn coordination_members(&self) -> Result<Vec<CoordinationMember>> {
        self.coordination_nodes
            .iter()
            .map(|entry| match entry.rsplit_once(':') {
                Some((host, port)) => {
                    let port = port.parse::<u16>().map_err(|e| HaError::InvalidConfig {
                        field: "bootstrap.coordination_nodes".to_string(),
                        reason: format!("bad port in {:?}: {}", entry, e),
                    })?;
                    Ok(CoordinationMember::new(host, port))
                }
                None => Ok(CoordinationMember::new(entry.as_str(), DEFAULT_COORDINATION_PORT)),
            })
            .collect()
    }
}

/// Serde helper for Duration using humantime format.
pub mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{}ms", duration.as_millis()))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub(crate) fn parse_duration(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|e| e.to_string())
        } else if let Some(s_val) = s.strip_suffix('s') {
            s_val
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|e| e.to_string())
        } else if let Some(m) = s.strip_suffix('m') {
            m.parse::<u64>()
                .map(|v| Duration::from_secs(v * 60))
                .map_err(|e| e.to_string())
        } else {
            s.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|e| e.to_string())
        }
    }
}
