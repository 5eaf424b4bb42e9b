//! Fire-and-forget merchant callbacks

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::domain::callback::PaymentCallback;
use crate::domain::ports::CallbackSender;
use crate::infrastructure::adapters::monitoring::ReconciliationMetrics;
use crate::shared::error::AppError;

pub struct CallbackDispatcher {
    sender: Arc<dyn CallbackSender>,
    metrics: Arc<ReconciliationMetrics>,
}

impl CallbackDispatcher {
    pub fn new(sender: Arc<dyn CallbackSender>, metrics: Arc<ReconciliationMetrics>) -> Self {
        Self { sender, metrics }
    }

    /// Deliver `payload` in the background. Returns `None` when there is no
    /// URL to deliver to. Delivery failures are logged and never retried.
    pub fn dispatch(&self, url: Option<&str>, payload: PaymentCallback) -> Option<JoinHandle<()>> {
        let url = match url.map(str::trim).filter(|u| !u.is_empty()) {
            Some(url) => url.to_string(),
            None => {
                info!(order_id = %payload.order_id, "No callback URL, skipping notification");
                self.metrics.record_callback("skipped");
                return None;
            }
        };

        let sender = Arc::clone(&self.sender);
        let metrics = Arc::clone(&self.metrics);

        Some(tokio::spawn(async move {
            let body = match serde_json::to_value(&payload) {
                Ok(body) => body,
                Err(e) => {
                    warn!(order_id = %payload.order_id, error = %e, "Callback payload not serializable");
                    metrics.record_callback("failed");
                    return;
                }
            };

            let outcome = match sender.post_json(&url, &body).await {
                Ok(status) if (200..300).contains(&status) => Ok(status),
                Ok(status) => Err(AppError::CallbackDeliveryFailed(format!(
                    "unexpected status {}",
                    status
                ))),
                Err(e) => Err(e),
            };

            match outcome {
                Ok(status) => {
                    info!(order_id = %payload.order_id, url = %url, status, "Callback delivered");
                    metrics.record_callback("delivered");
                }
                Err(e) => {
                    warn!(order_id = %payload.order_id, url = %url, error = %e, "Callback delivery failed");
                    metrics.record_callback("failed");
                }
            }
        }))
    }
}
