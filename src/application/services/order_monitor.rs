//! Per-order payment monitor
//!
//! Two timers drive a task: a poll job that queries the provider every
//! interval and a one-shot watchdog at the order's expiry. Whichever of
//! match, expiry or cancel commits first wins; the others become no-ops.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::application::services::monitor_context::MonitorContext;
use crate::application::services::scheduler::{Job, StopSignal};
use crate::application::services::task_registry::{MonitorJob, MonitorKey};
use crate::domain::orders::{CancelOutcome, OrderState, OrderUpdate, PaymentOrder};
use crate::shared::error::{AppError, AppResult};
use crate::shared::logging::LoggingUtils;

pub struct OrderMonitorTask {
    task_id: String,
    order: PaymentOrder,
    callback_url: Option<String>,
    window: (DateTime<Utc>, DateTime<Utc>),
    /// Time left until the watchdog fires, fixed at construction
    ttl_remaining: Duration,
    created: Instant,
    state: Mutex<OrderState>,
    stop: StopSignal,
    ctx: MonitorContext,
}

impl OrderMonitorTask {
    pub fn new(ctx: MonitorContext, order: PaymentOrder, callback_url: Option<String>) -> Arc<Self> {
        let window = ctx.query_window(&order);
        let ttl_remaining = (order.expires_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);

        Arc::new(Self {
            task_id: format!("order-{}-{}", order.id, Uuid::new_v4().simple()),
            state: Mutex::new(order.state),
            order,
            callback_url: callback_url.filter(|url| !url.trim().is_empty()),
            window,
            ttl_remaining,
            created: Instant::now(),
            stop: StopSignal::new(),
            ctx,
        })
    }

    pub fn order(&self) -> &PaymentOrder {
        &self.order
    }

    /// State as seen by this task.
    pub fn state(&self) -> AppResult<OrderState> {
        read_state(&self.state)
    }

    fn poll_job_id(&self) -> String {
        format!("{}:poll", self.task_id)
    }

    fn watchdog_job_id(&self) -> String {
        format!("{}:watchdog", self.task_id)
    }

    /// Claim the single terminal transition.
    fn try_commit(&self, next: OrderState) -> bool {
        match self.state.lock() {
            Ok(mut state) if !state.is_terminal() => {
                *state = next;
                true
            }
            Ok(_) => false,
            Err(_) => {
                error!(task_id = %self.task_id, attempted = %next, "Monitor state lock poisoned");
                false
            }
        }
    }

    /// Stop a task whose state can no longer be trusted and leave the order
    /// to the store-level paths.
    fn abandon(&self, err: &AppError) {
        error!(task_id = %self.task_id, order_id = %self.order.order_id, error = %err, "Abandoning monitor task");
        if self.halt() {
            if let Some(registry) = self.ctx.registry.upgrade() {
                registry.forget(self.key(), &self.task_id);
            }
        }
    }

    /// Fire the stop signal and deregister both timers.
    fn halt(&self) -> bool {
        if !self.stop.fire() {
            return false;
        }
        self.ctx.scheduler.cancel(&self.poll_job_id());
        self.ctx.scheduler.cancel(&self.watchdog_job_id());
        LoggingUtils::log_task_stopped(&self.task_id, &self.key().to_string(), self.created.elapsed());
        true
    }

    async fn finish(&self, update: OrderUpdate) -> bool {
        if !self.try_commit(update.state) {
            debug!(task_id = %self.task_id, attempted = %update.state, "Order already terminal");
            return false;
        }

        self.halt();
        self.ctx
            .settle(&self.order, update, self.callback_url.as_deref())
            .await;

        if let Some(registry) = self.ctx.registry.upgrade() {
            registry.forget(self.key(), &self.task_id);
        }
        true
    }

    async fn tick(&self) {
        if self.stop.is_fired() {
            return;
        }
        match self.state() {
            Ok(state) if state.is_terminal() => return,
            Ok(_) => {}
            Err(e) => {
                self.abandon(&e);
                return;
            }
        }

        // Another path may have settled the order already.
        match self.ctx.orders.get(self.order.id).await {
            Ok(Some(stored)) if stored.state.is_terminal() => {
                info!(task_id = %self.task_id, state = %stored.state, "Order settled elsewhere, stopping");
                if self.try_commit(stored.state) {
                    self.halt();
                    if let Some(registry) = self.ctx.registry.upgrade() {
                        registry.forget(self.key(), &self.task_id);
                    }
                }
                return;
            }
            Ok(_) => {}
            Err(e) => {
                LoggingUtils::log_tick_failure(&self.task_id, "order_lookup", &e);
                return;
            }
        }

        let (start, end) = self.window;
        match self.ctx.find_payment(&self.order, start, end).await {
            Ok(Some(matched)) => {
                self.ctx.metrics.record_tick("matched");
                let pay_time = matched
                    .pay_time(self.ctx.settings.provider_offset)
                    .unwrap_or_else(Utc::now);
                info!(
                    task_id = %self.task_id,
                    order_id = %self.order.order_id,
                    provider_order = %matched.order_no,
                    amount = %self.order.reserved_amount,
                    "Payment matched"
                );
                self.finish(OrderUpdate::paid(self.order.id, pay_time)).await;
            }
            Ok(None) => {
                self.ctx.metrics.record_tick("no_match");
                debug!(task_id = %self.task_id, amount = %self.order.reserved_amount, "No matching payment yet");
            }
            Err(e) => self.ctx.record_query_failure(&self.task_id, &e),
        }
    }

    async fn expire(&self) {
        if self.finish(OrderUpdate::failed(self.order.id)).await {
            warn!(
                task_id = %self.task_id,
                order_id = %self.order.order_id,
                amount = %self.order.reserved_amount,
                "Order expired without payment"
            );
        }
    }
}

#[async_trait]
impl MonitorJob for OrderMonitorTask {
    fn task_id(&self) -> &str {
        &self.task_id
    }

    fn key(&self) -> MonitorKey {
        MonitorKey::Order(self.order.id)
    }

    fn start(self: Arc<Self>) -> AppResult<()> {
        let poll_task = Arc::clone(&self);
        let poll: Job = Arc::new(move || {
            let task = Arc::clone(&poll_task);
            async move { task.tick().await }.boxed()
        });

        let watchdog_task = Arc::clone(&self);
        let watchdog: Job = Arc::new(move || {
            let task = Arc::clone(&watchdog_task);
            async move { task.expire().await }.boxed()
        });

        let scheduler = &self.ctx.scheduler;
        scheduler.every(&self.poll_job_id(), self.ctx.settings.poll_interval, poll)?;
        if let Err(e) = scheduler.after(&self.watchdog_job_id(), self.ttl_remaining, watchdog) {
            scheduler.cancel(&self.poll_job_id());
            return Err(e);
        }

        info!(
            task_id = %self.task_id,
            order_id = %self.order.order_id,
            merchant_id = self.order.merchant_id,
            amount = %self.order.reserved_amount,
            ttl_secs = self.ttl_remaining.as_secs(),
            "Order monitor started"
        );
        Ok(())
    }

    fn stop(&self) {
        self.halt();
    }

    fn is_running(&self) -> bool {
        !self.stop.is_fired()
    }

    async fn cancel(&self) -> Option<CancelOutcome> {
        if self.finish(OrderUpdate::canceled(self.order.id)).await {
            return Some(CancelOutcome::Canceled);
        }
        match self.state() {
            Ok(OrderState::Canceled) => Some(CancelOutcome::AlreadyCanceled),
            Ok(other) => Some(CancelOutcome::AlreadyTerminal(other)),
            Err(e) => {
                self.abandon(&e);
                None
            }
        }
    }
}

fn read_state(lock: &Mutex<OrderState>) -> AppResult<OrderState> {
    lock.lock()
        .map(|state| *state)
        .map_err(|_| AppError::Internal("monitor state lock poisoned".to_string()))
}
