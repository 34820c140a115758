//! Storage-service (NameNode) control interface.
//!
//! Every call is synchronous from the controller's point of view and either
//! succeeds or fails as a whole. [`HdfsCommandService`] drives a real
//! installation through the `hdfs` CLI and the daemon script, and renders
//! the HA site properties into `hdfs-site-ha.xml` under the configured
//! configuration directory.

use crate::config::{PortConfig, ServiceConfig};
use crate::error::{HaError, Result};
use crate::types::{CoordinationMember, HaRole, JournalPeerSet, NodeId};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

pub const SITE_FILE: &str = "hdfs-site-ha.xml";

const FAILOVER_PROXY_PROVIDER: &str =
    "org.apache.hadoop.hdfs.server.namenode.ha.ConfiguredFailoverProxyProvider";

/// Control operations on the local NameNode.
#[async_trait]
pub trait StorageService: Send + Sync {
    /// Point the NameNode at the given cluster nodes.
    async fn configure(&self, cluster_nodes: &[NodeId]) -> Result<()>;

    /// Format a fresh namespace.
    async fn format(&self) -> Result<()>;

    async fn start(&self) -> Result<()>;

    async fn stop(&self) -> Result<()>;

    async fn restart(&self) -> Result<()>;

    async fn register_journal_nodes(&self, nodes: &[NodeId], port: u16) -> Result<()>;

    /// Re-read the peer list without a restart.
    async fn reload_peer_list(&self) -> Result<()>;

    /// One-time initialization of the shared edit log. Not idempotent.
    async fn init_shared_edit_logs(&self) -> Result<()>;

    /// One-time copy of the active namespace onto a standby. Not idempotent.
    async fn bootstrap_standby(&self) -> Result<()>;

    async fn transition_to_active(&self, node: &NodeId) -> Result<()>;

    async fn configure_failover_coordinator(&self, members: &[CoordinationMember]) -> Result<()>;

    async fn format_failover_coordinator(&self) -> Result<()>;

    async fn start_failover_coordinator(&self) -> Result<()>;

    async fn stop_failover_coordinator(&self) -> Result<()>;

    async fn restart_failover_coordinator(&self) -> Result<()>;

    /// Current HA role of `node`.
    async fn ha_state(&self, node: &NodeId) -> Result<HaRole>;
}

#[derive(Debug, Default, Clone)]
struct SiteState {
    cluster_nodes: Vec<NodeId>,
    journal: Option<JournalPeerSet>,
    coordination: Vec<CoordinationMember>,
}

/// [`StorageService`] backed by the Hadoop command-line tools.
pub struct HdfsCommandService {
    config: ServiceConfig,
    ports: PortConfig,
    site: Mutex<SiteState>,
}

impl HdfsCommandService {
    pub fn new(config: ServiceConfig, ports: PortConfig) -> Self {
        Self {
            config,
            ports,
            site: Mutex::new(SiteState::default()),
        }
    }

    pub fn site_path(&self) -> PathBuf {
        self.config.conf_dir.join(SITE_FILE)
    }

    /// Render the HA site properties for the current state.
    fn render_properties(&self, site: &SiteState) -> BTreeMap<String, String> {
        let ns = &self.config.nameservice;
        let mut props = BTreeMap::new();

        props.insert("fs.defaultFS".to_string(), format!("hdfs://{}", ns));
        props.insert("dfs.nameservices".to_string(), ns.clone());

        let ids: Vec<&str> = site.cluster_nodes.iter().map(NodeId::as_str).collect();
        props.insert(format!("dfs.ha.namenodes.{}", ns), ids.join(","));
        for node in &site.cluster_nodes {
            props.insert(
                format!("dfs.namenode.rpc-address.{}.{}", ns, node),
                format!("{}:{}", node, self.ports.namenode),
            );
            props.insert(
                format!("dfs.namenode.http-address.{}.{}", ns, node),
                format!("{}:{}", node, self.ports.webhdfs),
            );
        }
        props.insert(
            format!("dfs.client.failover.proxy.provider.{}", ns),
            FAILOVER_PROXY_PROVIDER.to_string(),
        );
        props.insert("dfs.ha.fencing.methods".to_string(), "shell(/bin/true)".to_string());

        if let Some(journal) = &site.journal {
            props.insert(
                "dfs.namenode.shared.edits.dir".to_string(),
                journal.shared_edits_uri(ns),
            );
        }

        let automatic = !site.coordination.is_empty();
        props.insert(
            "dfs.ha.automatic-failover.enabled".to_string(),
            automatic.to_string(),
        );
        if automatic {
            let quorum: Vec<String> = site.coordination.iter().map(|m| m.to_string()).collect();
            props.insert("ha.zookeeper.quorum".to_string(), quorum.join(","));
        }

        props
    }

    fn write_site(&self) -> Result<()> {
        let site = self.site.lock().clone();
        let xml = render_xml(&self.render_properties(&site));
        std::fs::create_dir_all(&self.config.conf_dir)?;
        let path = self.site_path();
        let tmp = path.with_extension("xml.tmp");
        std::fs::write(&tmp, xml)?;
        std::fs::rename(&tmp, &path)?;
        debug!(path = %path.display(), "HA site configuration written");
        Ok(())
    }

    async fn run(&self, operation: &str, program: &PathBuf, args: &[&str]) -> Result<String> {
        info!(operation, program = %program.display(), args = ?args, "Running storage command");

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.config.command_timeout, child)
            .await
            .map_err(|_| HaError::TimedOut {
                what: operation.to_string(),
                after_ms: self.config.command_timeout.as_millis() as u64,
            })?
            .map_err(|e| HaError::service(operation, e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: String = stderr.lines().rev().take(5).collect::<Vec<_>>().join(" | ");
            warn!(operation, status = %output.status, "Storage command failed");
            return Err(HaError::service(
                operation,
                format!("{}: {}", output.status, tail),
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn hdfs(&self, operation: &str, args: &[&str]) -> Result<String> {
        self.run(operation, &self.config.hdfs_bin, args).await
    }

    async fn daemon(&self, operation: &str, action: &str, daemon: &str) -> Result<()> {
        self.run(operation, &self.config.daemon_bin, &[action, daemon])
            .await
            .map(|_| ())
    }
}

/// Render properties as a Hadoop configuration document.
fn render_xml(props: &BTreeMap<String, String>) -> String {
    let mut xml = String::from("<?xml version=\"1.0\"?>\n<configuration>\n");
    for (name, value) in props {
        xml.push_str("  <property>\n");
        xml.push_str(&format!("    <name>{}</name>\n", escape_xml(name)));
        xml.push_str(&format!("    <value>{}</value>\n", escape_xml(value)));
        xml.push_str("  </property>\n");
    }
    xml.push_str("</configuration>\n");
    xml
}

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[async_trait]
impl StorageService for HdfsCommandService {
    async fn configure(&self, cluster_nodes: &[NodeId]) -> Result<()> {
        self.site.lock().cluster_nodes = cluster_nodes.to_vec();
        self.write_site()
    }

    async fn format(&self) -> Result<()> {
        self.hdfs("format", &["namenode", "-format", "-nonInteractive"])
            .await
            .map(|_| ())
    }

    async fn start(&self) -> Result<()> {
        self.daemon("start", "start", "namenode").await
    }

    async fn stop(&self) -> Result<()> {
        self.daemon("stop", "stop", "namenode").await
    }

    async fn restart(&self) -> Result<()> {
        self.stop().await?;
        self.start().await
    }

    async fn register_journal_nodes(&self, nodes: &[NodeId], port: u16) -> Result<()> {
        self.site.lock().journal = Some(JournalPeerSet::new(nodes.to_vec(), port));
        self.write_site()
    }

    async fn reload_peer_list(&self) -> Result<()> {
        self.hdfs("reloadPeerList", &["dfsadmin", "-refreshNodes"])
            .await
            .map(|_| ())
    }

    async fn init_shared_edit_logs(&self) -> Result<()> {
        self.hdfs(
            "initSharedEditLogs",
            &["namenode", "-initializeSharedEdits", "-nonInteractive"],
        )
        .await
        .map(|_| ())
    }

    async fn bootstrap_standby(&self) -> Result<()> {
        self.hdfs(
            "bootstrapStandby",
            &["namenode", "-bootstrapStandby", "-nonInteractive"],
        )
        .await
        .map(|_| ())
    }

    async fn transition_to_active(&self, node: &NodeId) -> Result<()> {
        self.hdfs(
            "transitionToActive",
            &["haadmin", "-transitionToActive", node.as_str()],
        )
        .await
        .map(|_| ())
    }

    async fn configure_failover_coordinator(&self, members: &[CoordinationMember]) -> Result<()> {
        self.site.lock().coordination = members.to_vec();
        self.write_site()
    }

    async fn format_failover_coordinator(&self) -> Result<()> {
        self.hdfs("formatFailoverCoordinator", &["zkfc", "-formatZK", "-force"])
            .await
            .map(|_| ())
    }

    async fn start_failover_coordinator(&self) -> Result<()> {
        self.daemon("startFailoverCoordinator", "start", "zkfc").await
    }

    async fn stop_failover_coordinator(&self) -> Result<()> {
        self.daemon("stopFailoverCoordinator", "stop", "zkfc").await
    }

    async fn restart_failover_coordinator(&self) -> Result<()> {
        self.stop_failover_coordinator().await?;
        self.start_failover_coordinator().await
    }

    async fn ha_state(&self, node: &NodeId) -> Result<HaRole> {
        let out = self
            .hdfs("haState", &["haadmin", "-getServiceState", node.as_str()])
            .await?;
        Ok(HaRole::parse(&out))
    }
}

/// Default timeout used when probing a role from the status path.
pub const ROLE_QUERY_TIMEOUT: Duration = Duration::from_secs(10);
