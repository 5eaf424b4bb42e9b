//! TCP reachability probe for the provider portal

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::config::HealthConfig;
use crate::domain::health::ProbeReport;

/// Counts consecutive failed TCP connects to one address.
pub struct UpstreamProbe {
    address: String,
    timeout: Duration,
    max_failures: u32,
    consecutive_failures: AtomicU32,
}

impl UpstreamProbe {
    pub fn new(address: impl Into<String>, timeout: Duration, max_failures: u32) -> Self {
        Self {
            address: address.into(),
            timeout,
            max_failures: max_failures.max(1),
            consecutive_failures: AtomicU32::new(0),
        }
    }

    pub fn from_config(config: &HealthConfig) -> Self {
        Self::new(
            config.probe_address.clone(),
            Duration::from_secs(config.probe_timeout_seconds),
            config.max_failures,
        )
    }

    /// Connect once and update the failure counter. Returns reachability.
    pub async fn probe(&self) -> bool {
        let reachable = matches!(
            tokio::time::timeout(self.timeout, TcpStream::connect(&self.address)).await,
            Ok(Ok(_))
        );

        if reachable {
            let previous = self.consecutive_failures.swap(0, Ordering::SeqCst);
            if previous >= self.max_failures {
                warn!(address = %self.address, "Upstream reachable again");
            }
            debug!(address = %self.address, "Upstream probe succeeded");
        } else {
            let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
            if failures == self.max_failures {
                warn!(address = %self.address, failures, "Upstream marked unhealthy");
            } else {
                debug!(address = %self.address, failures, "Upstream probe failed");
            }
        }

        reachable
    }

    pub fn is_healthy(&self) -> bool {
        self.consecutive_failures.load(Ordering::SeqCst) < self.max_failures
    }

    pub fn report(&self) -> ProbeReport {
        ProbeReport {
            address: self.address.clone(),
            consecutive_failures: self.consecutive_failures.load(Ordering::SeqCst),
            max_failures: self.max_failures,
            healthy: self.is_healthy(),
        }
    }
}
