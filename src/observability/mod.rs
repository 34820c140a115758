//! Observability for the HA controller.
//!
//! Provides logging, metrics and the HTTP status endpoints.

use crate::config::ObservabilityConfig;
use crate::controller::PassOutcome;
use crate::error::{HaError, Result};
use crate::ha::status::Verdict;
use crate::ha::Observation;
use crate::health::HealthResponse;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Json;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::watch;
use ::tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize observability (logging).
pub fn init(config: &ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| HaError::Internal(format!("Failed to init logging: {}", e)))?;
    } else {
        subscriber
            .with(fmt::layer())
            .try_init()
            .map_err(|e| HaError::Internal(format!("Failed to init logging: {}", e)))?;
    }

    info!("Observability initialized");
    Ok(())
}

#[derive(Clone)]
struct ServerState {
    handle: PrometheusHandle,
    verdicts: watch::Receiver<Verdict>,
    started: Instant,
}

/// Run the Prometheus metrics server with the `/health` and `/status`
/// endpoints.
pub async fn run_metrics_server(
    config: ObservabilityConfig,
    verdicts: watch::Receiver<Verdict>,
) -> Result<()> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| HaError::Internal(format!("Failed to install metrics recorder: {}", e)))?;

    register_metrics();

    let state = ServerState {
        handle,
        verdicts,
        started: Instant::now(),
    };

    let app = axum::Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .with_state(state);

    let listener = TcpListener::bind(config.metrics_addr).await?;
    info!(addr = %config.metrics_addr, "Metrics server listening");

    axum::serve(listener, app)
        .await
        .map_err(|e| HaError::Network(e.to_string()))?;

    Ok(())
}

async fn metrics_handler(State(state): State<ServerState>) -> String {
    state.handle.render()
}

async fn health_handler(State(state): State<ServerState>) -> impl IntoResponse {
    let verdict = state.verdicts.borrow().clone();
    let response = HealthResponse::from_verdict(&verdict, crate::VERSION, state.started);
    let code = StatusCode::from_u16(response.status.to_status_code())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (code, Json(response))
}

async fn status_handler(State(state): State<ServerState>) -> String {
    state.verdicts.borrow().to_string()
}

/// Register standard metrics.
fn register_metrics() {
    gauge!("namenode_ha_peers_joined").set(0.0);
    gauge!("namenode_ha_journal_peers").set(0.0);
    gauge!("namenode_ha_quorum_satisfied").set(0.0);
    gauge!("namenode_ha_chosen_nodes").set(0.0);
    gauge!("namenode_ha_leader").set(0.0);
    gauge!("namenode_ha_failover_state").set(0.0);
    gauge!("namenode_ha_degraded").set(0.0);
    counter!("namenode_ha_passes_total").absolute(0);
    counter!("namenode_ha_pass_failures_total").absolute(0);
    counter!("namenode_ha_bootstraps_total").absolute(0);
    counter!("namenode_ha_restarts_total").absolute(0);
    counter!("namenode_ha_chosen_set_writes_total").absolute(0);
}

/// Record a completed bootstrap.
pub fn record_bootstrap(role: &str) {
    counter!("namenode_ha_bootstraps_total", "role" => role.to_string()).increment(1);
}

/// Record a storage-service restart.
pub fn record_restart(reason: &str) {
    counter!("namenode_ha_restarts_total", "reason" => reason.to_string()).increment(1);
}

/// Record a write of the chosen set.
pub fn record_chosen_set_write() {
    counter!("namenode_ha_chosen_set_writes_total").increment(1);
}

/// Update the gauges after a reconciliation pass.
pub fn record_pass(obs: &Observation, outcome: &PassOutcome, elapsed: Duration) {
    counter!("namenode_ha_passes_total").increment(1);
    if outcome.error.is_some() {
        counter!("namenode_ha_pass_failures_total").increment(1);
    }
    histogram!("namenode_ha_pass_duration_seconds").record(elapsed.as_secs_f64());

    gauge!("namenode_ha_peers_joined").set(obs.peers.len() as f64);
    gauge!("namenode_ha_journal_peers").set(obs.quorum.joined as f64);
    gauge!("namenode_ha_quorum_satisfied").set(bool_gauge(obs.quorum.satisfied));
    gauge!("namenode_ha_chosen_nodes")
        .set(obs.chosen.as_ref().map(|c| c.len()).unwrap_or(0) as f64);
    gauge!("namenode_ha_leader").set(bool_gauge(obs.is_leader));
    gauge!("namenode_ha_failover_state").set(outcome.failover.as_gauge());
    gauge!("namenode_ha_degraded").set(bool_gauge(!outcome.verdict.is_healthy()));
}

fn bool_gauge(value: bool) -> f64 {
    if value {
        1.0
    } else {
        0.0
    }
}
