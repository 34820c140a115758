//! namenode-ha - High-availability coordination for an active/standby NameNode pair.
//!
//! The controller selects the HA pair, tracks journal quorum health, drives the
//! one-time bootstrap that turns two independent NameNodes into an
//! active/standby pair, supervises the automatic-failover coordinator and
//! reduces all of it to a single health verdict.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      HaController                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  observe: Prober | QuorumMonitor | HaStore | directories    │
//! ├─────────────────────────────────────────────────────────────┤
//! │  stages: membership → bootstrap → failover → status         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  effects: StorageService | CoordinationStore | PeerDirectory │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! use namenode_ha::config::HaConfig;
//!
//! #[tokio::main]
//! async fn main() -> namenode_ha::Result<()> {
//!     let config = HaConfig::development();
//!     namenode_ha::run(config).await
//! }
//! ```

pub mod config;
pub mod error;
pub mod types;

pub mod controller;
pub mod directory;
pub mod ha;
pub mod health;
pub mod local_state;
pub mod probe;
pub mod quorum;
pub mod service;
pub mod shutdown;
pub mod store;

pub mod cli;
pub mod observability;

// Re-exports
pub use controller::{ControlEvent, ControllerSettings, HaController, PassOutcome};
pub use error::{HaError, Result};
pub use types::*;

use config::HaConfig;
use directory::{MemoryCoordination, MemoryJournal, PeerRelation};
use ha::HaContext;
use local_state::LocalState;
use probe::TcpProber;
use service::HdfsCommandService;
use shutdown::{ShutdownCoordinator, SHUTDOWN_TIMEOUT};
use std::sync::Arc;
use store::{HaStore, MemoryCluster};
use tracing::{error, info, warn};

/// Crate version, reported by `/health` and the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build a controller context from the configuration's bootstrap seed.
///
/// The seed populates in-memory directories and a single-node coordination
/// store, which is enough to run one node against static topology.
pub fn seeded_context(config: &HaConfig) -> Result<HaContext> {
    let local = config.local_id();
    let seed = &config.bootstrap;

    let cluster = MemoryCluster::new();
    if seed.leader {
        cluster.set_leader(Some(local.clone()));
    }

    let relation = PeerRelation::new();
    relation.join(local.clone(), local.as_str());
    for peer in &seed.peers {
        relation.join(NodeId::from(peer.as_str()), peer.as_str());
    }

    let journal = MemoryJournal::new(seed.journal_port);
    for node in &seed.journal_nodes {
        journal.join(NodeId::from(node.as_str()));
    }

    let coordination = MemoryCoordination::new();
    let members = seed.coordination_members()?;
    coordination.set_ready(!members.is_empty());
    coordination.set_members(members);

    Ok(HaContext {
        local: local.clone(),
        namenode_port: config.ports.namenode,
        store: HaStore::new(Arc::new(cluster.store(local.clone()))),
        local_state: LocalState::open(&config.node.state_dir)?,
        service: Arc::new(HdfsCommandService::new(
            config.service.clone(),
            config.ports.clone(),
        )),
        prober: Arc::new(TcpProber::new(config.probe.connect_timeout)),
        peers: Arc::new(relation.view(local)),
        journal: Arc::new(journal),
        coordination: Arc::new(coordination),
    })
}

/// Run the controller with the given configuration until a shutdown signal.
pub async fn run(config: HaConfig) -> Result<()> {
    info!(unit = %config.node.unit_name, "Starting NameNode HA controller");

    let controller = HaController::new(seeded_context(&config)?, ControllerSettings::from(&config));
    let coordinator = ShutdownCoordinator::new();

    let mut metrics_handle = None;
    if config.observability.metrics_enabled {
        info!(addr = %config.observability.metrics_addr, "Starting metrics server");
        let obs_config = config.observability.clone();
        let verdicts = controller.verdicts();
        metrics_handle = Some(tokio::spawn(async move {
            if let Err(e) = observability::run_metrics_server(obs_config, verdicts).await {
                error!("Metrics server error: {}", e);
            }
        }));
    }

    let signal_coordinator = coordinator.clone();
    tokio::spawn(async move {
        if let Err(e) = shutdown::forward_signals(signal_coordinator.clone()).await {
            error!("Signal handler error: {}", e);
            signal_coordinator.shutdown();
        }
    });

    let controller_handle = tokio::spawn(controller.run(coordinator.subscribe()));

    coordinator.wait_for_shutdown().await;
    info!("Shutting down NameNode HA controller");

    if tokio::time::timeout(SHUTDOWN_TIMEOUT, controller_handle)
        .await
        .is_err()
    {
        warn!("Controller did not stop within {:?}", SHUTDOWN_TIMEOUT);
    }

    if let Some(handle) = metrics_handle {
        handle.abort();
    }

    info!("Shutdown complete");
    Ok(())
}
