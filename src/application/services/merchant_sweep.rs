//! Merchant-wide reservation sweep
//!
//! One task per merchant walks every live reservation of that merchant on
//! each interval, instead of one task per order. Orders that already have
//! a per-order monitor are left to it.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use rust_decimal::Decimal;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::application::services::monitor_context::MonitorContext;
use crate::application::services::scheduler::{Job, StopSignal};
use crate::application::services::task_registry::{MonitorJob, MonitorKey};
use crate::domain::orders::OrderUpdate;
use crate::shared::error::{AppError, AppResult};
use crate::shared::logging::LoggingUtils;

/// What a sweep did with one reservation key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepAction {
    Skipped,
    Pending,
    Paid,
    Expired,
}

pub struct MerchantSweepTask {
    task_id: String,
    merchant_id: i64,
    callback_url: Option<String>,
    created: Instant,
    stop: StopSignal,
    ctx: MonitorContext,
}

impl MerchantSweepTask {
    pub fn new(ctx: MonitorContext, merchant_id: i64, callback_url: Option<String>) -> Arc<Self> {
        Arc::new(Self {
            task_id: format!("merchant-{}-{}", merchant_id, Uuid::new_v4().simple()),
            merchant_id,
            callback_url: callback_url.filter(|url| !url.trim().is_empty()),
            created: Instant::now(),
            stop: StopSignal::new(),
            ctx,
        })
    }

    fn job_id(&self) -> String {
        format!("{}:sweep", self.task_id)
    }

    /// One pass over the merchant's reservations.
    pub async fn sweep(&self) -> Vec<SweepAction> {
        let reservations = match self.ctx.allocator.reservations(self.merchant_id).await {
            Ok(reservations) => reservations,
            Err(e) => {
                LoggingUtils::log_tick_failure(&self.task_id, "scan", &e);
                return Vec::new();
            }
        };

        debug!(task_id = %self.task_id, count = reservations.len(), "Sweeping reservations");

        let mut actions = Vec::with_capacity(reservations.len());
        for (key, amount) in reservations {
            if self.stop.is_fired() {
                break;
            }
            let action = match self.process(&key, amount).await {
                Ok(action) => action,
                Err(e) if e.is_recoverable() || e.is_benign() => {
                    debug!(
                        task_id = %self.task_id,
                        key = %key,
                        kind = e.kind(),
                        error = %e,
                        "Skipping reservation until next sweep"
                    );
                    SweepAction::Skipped
                }
                Err(e) => {
                    warn!(task_id = %self.task_id, key = %key, kind = e.kind(), error = %e, "Skipping reservation");
                    SweepAction::Skipped
                }
            };
            actions.push(action);
        }
        actions
    }

    async fn process(&self, key: &str, amount: Decimal) -> AppResult<SweepAction> {
        // Lapsed between the scan and now.
        let Some(holder) = self.ctx.allocator.holder(key).await? else {
            return Ok(SweepAction::Skipped);
        };

        let order = self
            .ctx
            .orders
            .find_by_order_id(self.merchant_id, &holder)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("order {} for {}", holder, key)))?;

        if order.reserved_amount != amount || order.state.is_terminal() {
            return Ok(SweepAction::Skipped);
        }

        if let Some(registry) = self.ctx.registry.upgrade() {
            if registry.contains(MonitorKey::Order(order.id)) {
                return Ok(SweepAction::Skipped);
            }
        }

        if order.is_expired_at(Utc::now()) {
            let settled = self
                .ctx
                .settle(&order, OrderUpdate::failed(order.id), None)
                .await;
            if settled {
                warn!(task_id = %self.task_id, order_id = %order.order_id, "Order expired without payment");
            }
            return Ok(SweepAction::Expired);
        }

        let (start, end) = self.ctx.query_window(&order);
        match self.ctx.find_payment(&order, start, end).await {
            Ok(Some(matched)) => {
                self.ctx.metrics.record_tick("matched");
                let pay_time = matched
                    .pay_time(self.ctx.settings.provider_offset)
                    .unwrap_or_else(Utc::now);
                info!(
                    task_id = %self.task_id,
                    order_id = %order.order_id,
                    provider_order = %matched.order_no,
                    "Payment matched"
                );
                self.ctx
                    .settle(&order, OrderUpdate::paid(order.id, pay_time), self.callback_url.as_deref())
                    .await;
                Ok(SweepAction::Paid)
            }
            Ok(None) => {
                self.ctx.metrics.record_tick("no_match");
                Ok(SweepAction::Pending)
            }
            Err(e) => {
                self.ctx.record_query_failure(&self.task_id, &e);
                Err(e)
            }
        }
    }
}

#[async_trait]
impl MonitorJob for MerchantSweepTask {
    fn task_id(&self) -> &str {
        &self.task_id
    }

    fn key(&self) -> MonitorKey {
        MonitorKey::Merchant(self.merchant_id)
    }

    fn start(self: Arc<Self>) -> AppResult<()> {
        let task = Arc::clone(&self);
        let job: Job = Arc::new(move || {
            let task = Arc::clone(&task);
            async move {
                task.sweep().await;
            }
            .boxed()
        });

        self.ctx
            .scheduler
            .every(&self.job_id(), self.ctx.settings.sweep_interval, job)?;
        info!(task_id = %self.task_id, merchant_id = self.merchant_id, "Merchant sweep started");
        Ok(())
    }

    fn stop(&self) {
        if self.stop.fire() {
            self.ctx.scheduler.cancel(&self.job_id());
            LoggingUtils::log_task_stopped(&self.task_id, &self.key().to_string(), self.created.elapsed());
        }
    }

    fn is_running(&self) -> bool {
        !self.stop.is_fired()
    }
}
