//! Reconciliation engine facade
//!
//! Wires the allocator, session manager, scheduler, callback dispatcher and
//! task registry together and exposes the operations the API layer calls.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::application::services::{
    AmountAllocator, CallbackDispatcher, Job, MerchantSweepTask, MonitorContext, MonitorKey,
    MonitorSettings, OrderMonitorTask, Scheduler, SessionManager, TaskRegistry,
};
use crate::application::use_cases::HealthCheckUseCase;
use crate::config::AppConfig;
use crate::domain::health::HealthResponse;
use crate::domain::merchants::MerchantAccount;
use crate::domain::orders::{
    CancelOutcome, NewPaymentOrder, OrderHandle, OrderState, OrderStateView, OrderUpdate,
    Principal,
};
use crate::domain::ports::{
    CallbackSender, KeyValueStore, MerchantAccountStore, OrderStore, ProviderGateways,
};
use crate::domain::reservation::{format_amount, DecimalRange};
use crate::infrastructure::adapters::monitoring::ReconciliationMetrics;
use crate::infrastructure::adapters::upstream_probe::UpstreamProbe;
use crate::shared::error::{AppError, AppResult};

const PROBE_JOB_ID: &str = "upstream-probe";

/// External collaborators the engine is built from.
pub struct EngineDeps {
    pub kv: Arc<dyn KeyValueStore>,
    pub orders: Arc<dyn OrderStore>,
    pub merchants: Arc<dyn MerchantAccountStore>,
    pub gateways: ProviderGateways,
    pub callbacks: Arc<dyn CallbackSender>,
    pub scheduler: Arc<dyn Scheduler>,
}

/// Allocation request from the API layer.
#[derive(Debug, Clone)]
pub struct ReserveRequest {
    pub merchant_id: i64,
    /// Caller-supplied order id, unique per merchant
    pub order_id: String,
    pub requested_amount: Decimal,
    /// Overrides the merchant's decimal bounds
    pub decimal_range: Option<DecimalRange>,
    /// Reservation and order lifetime; `None` or zero selects the default
    pub ttl: Option<Duration>,
}

impl ReserveRequest {
    pub fn new(merchant_id: i64, order_id: impl Into<String>, requested_amount: Decimal) -> Self {
        Self {
            merchant_id,
            order_id: order_id.into(),
            requested_amount,
            decimal_range: None,
            ttl: None,
        }
    }

    pub fn with_range(mut self, range: DecimalRange) -> Self {
        self.decimal_range = Some(range);
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

pub struct ReconciliationEngine {
    config: AppConfig,
    kv: Arc<dyn KeyValueStore>,
    ctx: MonitorContext,
    registry: Arc<TaskRegistry>,
    probe: Option<Arc<UpstreamProbe>>,
}

impl ReconciliationEngine {
    pub fn new(config: AppConfig, deps: EngineDeps) -> AppResult<Self> {
        let settings = MonitorSettings::from_config(&config.monitor)?;
        let metrics = Arc::new(ReconciliationMetrics::new()?);

        let allocator = Arc::new(AmountAllocator::new(
            Arc::clone(&deps.kv),
            config.redis.namespace_reservation.clone(),
            Arc::clone(&metrics),
        ));
        let sessions = Arc::new(SessionManager::new(
            Arc::clone(&deps.kv),
            deps.gateways.clone(),
            config.redis.namespace_session.clone(),
            config.session.clone(),
            Arc::clone(&metrics),
        ));
        let callbacks = Arc::new(CallbackDispatcher::new(deps.callbacks, Arc::clone(&metrics)));
        let registry = Arc::new(TaskRegistry::new(Arc::clone(&metrics)));

        let probe = config
            .health
            .enabled
            .then(|| Arc::new(UpstreamProbe::from_config(&config.health)));

        let ctx = MonitorContext {
            orders: deps.orders,
            merchants: deps.merchants,
            sessions,
            gateways: deps.gateways,
            allocator,
            scheduler: deps.scheduler,
            callbacks,
            metrics,
            registry: Arc::downgrade(&registry),
            settings,
        };

        info!(
            poll_secs = settings.poll_interval.as_secs(),
            sweep_secs = settings.sweep_interval.as_secs(),
            providers = ctx.gateways.len(),
            "Reconciliation engine ready"
        );

        Ok(Self {
            config,
            kv: deps.kv,
            ctx,
            registry,
            probe,
        })
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    pub fn metrics(&self) -> &Arc<ReconciliationMetrics> {
        &self.ctx.metrics
    }

    pub fn allocator(&self) -> &Arc<AmountAllocator> {
        &self.ctx.allocator
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.ctx.sessions
    }

    async fn account(&self, merchant_id: i64) -> AppResult<MerchantAccount> {
        self.ctx
            .merchants
            .get(merchant_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("merchant account {}", merchant_id)))
    }

    /// Reserve a collision-free amount and persist the pending order.
    pub async fn allocate_and_reserve(
        &self,
        request: ReserveRequest,
    ) -> AppResult<(Decimal, OrderHandle)> {
        if request.order_id.trim().is_empty() {
            return Err(AppError::Validation("order id must not be empty".to_string()));
        }

        let account = self.account(request.merchant_id).await?;
        account.check_amount(request.requested_amount)?;

        let range = request
            .decimal_range
            .unwrap_or_else(|| account.decimal_range(self.config.allocator.default_range()));
        let ttl = request
            .ttl
            .filter(|ttl| !ttl.is_zero())
            .unwrap_or_else(|| self.config.allocator.default_ttl());
        let lifetime = chrono::Duration::from_std(ttl)
            .map_err(|_| AppError::Validation(format!("ttl {:?} is out of range", ttl)))?;

        // Taken before the lease starts so the lease never lapses ahead of the watchdog.
        let created_at = Utc::now();
        let reserved = self
            .ctx
            .allocator
            .reserve(
                request.merchant_id,
                request.requested_amount,
                range,
                ttl,
                &request.order_id,
            )
            .await?
            .ok_or_else(|| AppError::AllocationExhausted {
                merchant_id: request.merchant_id,
                base: format_amount(request.requested_amount),
            })?;

        let new_order = NewPaymentOrder {
            order_id: request.order_id.clone(),
            merchant_id: request.merchant_id,
            provider: account.provider,
            requested_amount: request.requested_amount,
            reserved_amount: reserved,
            created_at,
            expires_at: created_at + lifetime,
        };

        let order = match self.ctx.orders.insert(new_order).await {
            Ok(order) => order,
            Err(e) => {
                if let Err(release_err) = self
                    .ctx
                    .allocator
                    .release(request.merchant_id, reserved, &request.order_id)
                    .await
                {
                    warn!(
                        merchant_id = request.merchant_id,
                        amount = %reserved,
                        error = %release_err,
                        "Failed to release reservation after insert failure"
                    );
                }
                return Err(e);
            }
        };

        info!(
            merchant_id = order.merchant_id,
            order_id = %order.order_id,
            requested = %format_amount(order.requested_amount),
            amount = %format_amount(reserved),
            ttl_secs = ttl.as_secs(),
            "Order reserved"
        );
        Ok((reserved, order.handle()))
    }

    /// Start (or return) the monitor for a pending order. Returns its task id.
    pub async fn start_monitoring(
        &self,
        handle: &OrderHandle,
        callback_url: Option<&str>,
    ) -> AppResult<String> {
        let order = self
            .ctx
            .orders
            .get(handle.id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("order {}", handle.id)))?;

        if order.merchant_id != handle.merchant_id || order.order_id != handle.order_id {
            return Err(AppError::Forbidden(format!(
                "order {} does not match the supplied handle",
                handle.id
            )));
        }
        if order.state.is_terminal() {
            return Err(AppError::AlreadyTerminal {
                order_id: order.order_id,
                state: order.state,
            });
        }

        let ctx = self.ctx.clone();
        let url = callback_url.map(str::to_string);
        let task = self
            .registry
            .start_or_get(MonitorKey::Order(order.id), move || {
                OrderMonitorTask::new(ctx, order, url)
            })?;
        Ok(task.task_id().to_string())
    }

    /// Start (or return) the reservation sweep of one merchant.
    pub async fn start_merchant_sweep(
        &self,
        merchant_id: i64,
        callback_url: Option<&str>,
    ) -> AppResult<String> {
        self.account(merchant_id).await?;

        let ctx = self.ctx.clone();
        let url = callback_url.map(str::to_string);
        let task = self
            .registry
            .start_or_get(MonitorKey::Merchant(merchant_id), move || {
                MerchantSweepTask::new(ctx, merchant_id, url)
            })?;
        Ok(task.task_id().to_string())
    }

    /// Stop one monitor without touching its order.
    pub fn stop_monitoring(&self, key: MonitorKey) -> bool {
        self.registry.stop(key)
    }

    /// Cancel a pending order owned by `principal`.
    ///
    /// Cancelling an already cancelled order is a no-op, as is cancelling
    /// one that reached another terminal state first.
    pub async fn cancel_order(&self, principal: &Principal, id: i64) -> AppResult<CancelOutcome> {
        let order = self
            .ctx
            .orders
            .get(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("order {}", id)))?;

        if !principal.owns(&order) {
            warn!(
                order = id,
                merchant_id = principal.merchant_id,
                "Cancel rejected for foreign order"
            );
            return Err(AppError::Forbidden(format!(
                "order {} does not belong to merchant {}",
                id, principal.merchant_id
            )));
        }

        match order.state {
            OrderState::Canceled => return Ok(CancelOutcome::AlreadyCanceled),
            OrderState::Paid | OrderState::Failed => {
                return Ok(CancelOutcome::AlreadyTerminal(order.state))
            }
            OrderState::Pending => {}
        }

        if let Some(task) = self.registry.get(MonitorKey::Order(id)) {
            if let Some(outcome) = task.cancel().await {
                info!(order_id = %order.order_id, outcome = ?outcome, "Cancel handled by monitor");
                return Ok(outcome);
            }
        }

        if self.ctx.settle(&order, OrderUpdate::canceled(id), None).await {
            return Ok(CancelOutcome::Canceled);
        }

        let current = self.ctx.orders.get(id).await?.map(|o| o.state);
        debug!(order = id, state = ?current, "Cancel lost the race to another transition");
        Ok(match current {
            Some(OrderState::Canceled) => CancelOutcome::AlreadyCanceled,
            Some(state) if state.is_terminal() => CancelOutcome::AlreadyTerminal(state),
            _ => CancelOutcome::AlreadyTerminal(OrderState::Pending),
        })
    }

    /// Read-only projection of the principal's order.
    pub async fn get_order_state(
        &self,
        principal: &Principal,
        order_id: &str,
    ) -> AppResult<OrderStateView> {
        self.ctx
            .orders
            .find_by_order_id(principal.merchant_id, order_id)
            .await?
            .map(|order| order.view())
            .ok_or_else(|| AppError::NotFound(format!("order {}", order_id)))
    }

    /// Run the upstream probe on its interval. No-op when the probe is disabled.
    pub fn start_health_probe(&self) -> AppResult<bool> {
        let Some(probe) = self.probe.clone() else {
            return Ok(false);
        };

        let job: Job = Arc::new(move || {
            let probe = Arc::clone(&probe);
            async move {
                probe.probe().await;
            }
            .boxed()
        });
        self.ctx.scheduler.every(
            PROBE_JOB_ID,
            Duration::from_secs(self.config.health.probe_interval_seconds),
            job,
        )?;
        Ok(true)
    }

    pub async fn health(&self) -> AppResult<HealthResponse> {
        HealthCheckUseCase::new(
            Arc::clone(&self.kv),
            self.probe.clone(),
            Arc::clone(&self.registry),
        )
        .execute()
        .await
    }

    /// Stop every monitor and the probe. Reservations are left to their ttl.
    pub fn shutdown(&self) -> usize {
        self.ctx.scheduler.cancel(PROBE_JOB_ID);
        let stopped = self.registry.stop_all();
        info!(stopped, "Reconciliation engine stopped");
        stopped
    }
}
