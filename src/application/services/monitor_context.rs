//! Collaborators shared by order monitors and merchant sweeps
//!
//! Holds the provider query used by every poll and the settlement step
//! every terminal transition goes through.

use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Utc};
use tracing::{debug, error, info, warn};

use crate::application::services::allocator::AmountAllocator;
use crate::application::services::callback_dispatcher::CallbackDispatcher;
use crate::application::services::scheduler::Scheduler;
use crate::application::services::session_manager::SessionManager;
use crate::application::services::task_registry::TaskRegistry;
use crate::config::MonitorConfig;
use crate::domain::callback::PaymentCallback;
use crate::domain::orders::{OrderState, OrderUpdate, PaymentOrder};
use crate::domain::ports::{MerchantAccountStore, OrderStore, ProviderGateways};
use crate::domain::provider::{decode_orders, find_match, ProviderOrder};
use crate::infrastructure::adapters::monitoring::ReconciliationMetrics;
use crate::shared::error::{AppError, AppResult};
use crate::shared::logging::LoggingUtils;
use crate::shared::time::{format_provider_time, window_start};

/// Timing knobs resolved from [`MonitorConfig`].
#[derive(Debug, Clone, Copy)]
pub struct MonitorSettings {
    pub poll_interval: Duration,
    pub sweep_interval: Duration,
    pub provider_timeout: Duration,
    pub default_window: Duration,
    pub provider_offset: FixedOffset,
}

impl MonitorSettings {
    pub fn from_config(config: &MonitorConfig) -> AppResult<Self> {
        Ok(Self {
            poll_interval: config.poll_interval(),
            sweep_interval: config.sweep_interval(),
            provider_timeout: config.provider_timeout(),
            default_window: Duration::from_secs(config.default_window_seconds),
            provider_offset: config.provider_offset()?,
        })
    }
}

#[derive(Clone)]
pub struct MonitorContext {
    pub orders: Arc<dyn OrderStore>,
    pub merchants: Arc<dyn MerchantAccountStore>,
    pub sessions: Arc<SessionManager>,
    pub gateways: ProviderGateways,
    pub allocator: Arc<AmountAllocator>,
    pub scheduler: Arc<dyn Scheduler>,
    pub callbacks: Arc<CallbackDispatcher>,
    pub metrics: Arc<ReconciliationMetrics>,
    pub registry: Weak<TaskRegistry>,
    pub settings: MonitorSettings,
}

impl MonitorContext {
    /// Provider query window `[createdAt, expiresAt]`.
    pub fn query_window(&self, order: &PaymentOrder) -> (DateTime<Utc>, DateTime<Utc>) {
        let start = window_start(order.created_at);
        let end = if order.expires_at > order.created_at {
            order.expires_at
        } else {
            order.created_at
                + chrono::Duration::from_std(self.settings.default_window)
                    .unwrap_or_else(|_| chrono::Duration::seconds(300))
        };
        (start, end)
    }

    /// Look for a provider record paying `order` within the window.
    pub async fn find_payment(
        &self,
        order: &PaymentOrder,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> AppResult<Option<ProviderOrder>> {
        let account = self
            .merchants
            .get(order.merchant_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("merchant account {}", order.merchant_id)))?;

        let session = self.sessions.get_valid_session(&account).await?;
        let gateway = self.gateways.get(account.provider)?;

        debug!(
            order_id = %order.order_id,
            provider = %account.provider,
            start = %format_provider_time(start, self.settings.provider_offset),
            end = %format_provider_time(end, self.settings.provider_offset),
            "Querying provider order list"
        );

        let raw = tokio::time::timeout(
            self.settings.provider_timeout,
            gateway.fetch_orders(&session, start, end),
        )
        .await
        .map_err(|_| {
            AppError::ProviderIo(format!(
                "order query timed out after {}s",
                self.settings.provider_timeout.as_secs()
            ))
        })??;

        let rows = decode_orders(account.provider, &raw)?;
        Ok(find_match(&rows, order.reserved_amount, start, end, self.settings.provider_offset).cloned())
    }

    /// Count and log a failed provider query.
    pub fn record_query_failure(&self, task_id: &str, err: &AppError) {
        let stage = query_failure_stage(err);
        self.metrics.record_tick(stage);
        LoggingUtils::log_tick_failure(task_id, stage, err);
    }

    /// Persist a terminal transition, release the reservation and notify
    /// the merchant when paid. Returns whether the store applied it.
    pub async fn settle(
        &self,
        order: &PaymentOrder,
        update: OrderUpdate,
        callback_url: Option<&str>,
    ) -> bool {
        let state = update.state;
        let pay_time = update.pay_time;

        let applied = match self.orders.transition(update).await {
            Ok(applied) => applied,
            Err(e) => {
                error!(order_id = %order.order_id, state = %state, error = %e, "Failed to persist order transition");
                false
            }
        };

        // Holder-checked: a lease that lapsed and was retaken by another order survives.
        if let Err(e) = self
            .allocator
            .release(order.merchant_id, order.reserved_amount, &order.order_id)
            .await
        {
            warn!(
                order_id = %order.order_id,
                amount = %order.reserved_amount,
                error = %e,
                "Failed to release reservation, it will expire with its ttl"
            );
        }

        if !applied {
            debug!(order_id = %order.order_id, state = %state, "Order was no longer pending");
            return false;
        }

        self.metrics.record_settlement(state);
        info!(
            order_id = %order.order_id,
            merchant_id = order.merchant_id,
            amount = %order.reserved_amount,
            state = %state,
            "Order settled"
        );

        if state == OrderState::Paid {
            let paid_at = pay_time.unwrap_or_else(Utc::now);
            self.callbacks
                .dispatch(callback_url, PaymentCallback::paid(order, paid_at));
        }

        true
    }
}

/// Metric label for a failed provider query. Recoverable failures share a
/// label per stage; anything else is labelled by its kind.
fn query_failure_stage(err: &AppError) -> &'static str {
    match err {
        AppError::SessionAcquisitionFailed { .. } => "session_error",
        _ if err.is_recoverable() => "provider_error",
        _ => err.kind(),
    }
}
