//! Health domain models

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Health status enumeration
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Store reachable and upstream portal answering
    Healthy,
    /// Store reachable, upstream portal failing
    Degraded,
    /// Store unreachable
    Unhealthy,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    /// Per-component details
    pub details: Value,
}

impl HealthResponse {
    pub fn new(status: HealthStatus, details: Value) -> Self {
        Self { status, details }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self.status, HealthStatus::Healthy)
    }

    /// Healthy or degraded
    pub fn is_available(&self) -> bool {
        matches!(self.status, HealthStatus::Healthy | HealthStatus::Degraded)
    }
}

/// Snapshot of the upstream TCP probe.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProbeReport {
    pub address: String,
    pub consecutive_failures: u32,
    pub max_failures: u32,
    pub healthy: bool,
}
