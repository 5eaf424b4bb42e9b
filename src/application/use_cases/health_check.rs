use crate::{
    application::services::TaskRegistry,
    domain::health::*,
    domain::ports::KeyValueStore,
    infrastructure::adapters::UpstreamProbe,
    shared::error::AppResult,
};
use serde_json::json;
use std::sync::Arc;
use tracing::warn;

/// Health check use case
pub struct HealthCheckUseCase {
    kv: Arc<dyn KeyValueStore>,
    probe: Option<Arc<UpstreamProbe>>,
    registry: Arc<TaskRegistry>,
}

impl HealthCheckUseCase {
    pub fn new(
        kv: Arc<dyn KeyValueStore>,
        probe: Option<Arc<UpstreamProbe>>,
        registry: Arc<TaskRegistry>,
    ) -> Self {
        Self { kv, probe, registry }
    }

    /// Store reachability decides healthy vs unhealthy; a failing upstream
    /// portal only degrades.
    pub async fn execute(&self) -> AppResult<HealthResponse> {
        let mut status = HealthStatus::Healthy;
        let mut details = json!({
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "version": env!("CARGO_PKG_VERSION"),
            "active_tasks": self.registry.len(),
        });

        match self.kv.ping().await {
            Ok(()) => {
                details["store"] = json!({ "status": "connected" });
            }
            Err(e) => {
                warn!(error = %e, "Key-value store unreachable");
                details["store"] = json!({ "status": "disconnected", "error": e.to_string() });
                status = HealthStatus::Unhealthy;
            }
        }

        match &self.probe {
            Some(probe) => {
                let report = probe.report();
                if !report.healthy && status == HealthStatus::Healthy {
                    status = HealthStatus::Degraded;
                }
                details["upstream"] = json!(report);
            }
            None => {
                details["upstream"] = json!({ "status": "not_probed" });
            }
        }

        Ok(HealthResponse::new(status, details))
    }
}
