//! Health payloads served next to the metrics endpoint.
//!
//! The HTTP health is a projection of the current status verdict.

use crate::ha::status::{MissingReason, Verdict};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Instant;

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Service is healthy.
    Healthy,
    /// Service is degraded but operational.
    Degraded,
    /// Service is unhealthy.
    Unhealthy,
}

impl HealthStatus {
    /// Convert to HTTP status code.
    pub fn to_status_code(&self) -> u16 {
        match self {
            HealthStatus::Healthy => 200,
            HealthStatus::Degraded => 200, // Still operational
            HealthStatus::Unhealthy => 503,
        }
    }

    /// Combine two statuses (worst wins).
    pub fn combine(&self, other: &HealthStatus) -> HealthStatus {
        match (self, other) {
            (HealthStatus::Unhealthy, _) | (_, HealthStatus::Unhealthy) => HealthStatus::Unhealthy,
            (HealthStatus::Degraded, _) | (_, HealthStatus::Degraded) => HealthStatus::Degraded,
            _ => HealthStatus::Healthy,
        }
    }
}

impl From<&Verdict> for HealthStatus {
    fn from(verdict: &Verdict) -> Self {
        match verdict {
            Verdict::Down => HealthStatus::Unhealthy,
            Verdict::Standalone | Verdict::Ha { .. } => HealthStatus::Healthy,
            Verdict::Pending { .. } | Verdict::Degraded { .. } => HealthStatus::Degraded,
        }
    }
}

/// Individual component health check result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    /// Component name.
    pub name: String,
    /// Health status.
    pub status: HealthStatus,
    /// Optional message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Additional details.
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub details: HashMap<String, String>,
}

impl ComponentHealth {
    pub fn new(name: impl Into<String>, status: HealthStatus) -> Self {
        Self {
            name: name.into(),
            status,
            message: None,
            details: HashMap::new(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Add detail.
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}

fn missing_component(reason: MissingReason) -> ComponentHealth {
    let name = match reason {
        MissingReason::NameNode => "peers",
        MissingReason::JournalNodes => "journal",
        MissingReason::Active => "active",
        MissingReason::Standby => "standby",
    };
    ComponentHealth::new(name, HealthStatus::Degraded).with_message(format!("missing {}", reason))
}

/// Full health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Overall status.
    pub status: HealthStatus,
    /// Verdict string.
    pub verdict: String,
    /// Service version.
    pub version: String,
    /// Uptime in seconds.
    pub uptime_seconds: u64,
    /// Individual component checks.
    pub components: Vec<ComponentHealth>,
    /// Timestamp.
    pub timestamp: String,
}

impl HealthResponse {
    /// Project a verdict into a health response.
    pub fn from_verdict(verdict: &Verdict, version: impl Into<String>, start_time: Instant) -> Self {
        let namenode = ComponentHealth::new("namenode", HealthStatus::from(verdict))
            .with_detail("state", verdict.state_name());

        let mut response = Self {
            status: HealthStatus::Healthy,
            verdict: verdict.to_string(),
            version: version.into(),
            uptime_seconds: start_time.elapsed().as_secs(),
            components: Vec::new(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };
        response.add_component(namenode);
        for reason in verdict.missing() {
            response.add_component(missing_component(*reason));
        }
        response
    }

    /// Add a component check.
    pub fn add_component(&mut self, component: ComponentHealth) {
        self.status = self.status.combine(&component.status);
        self.components.push(component);
    }
}
