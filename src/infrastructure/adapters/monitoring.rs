//! Prometheus metrics for the reconciliation engine

use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

use crate::domain::orders::OrderState;
use crate::shared::error::{AppError, AppResult};

/// Engine-owned metrics registry.
pub struct ReconciliationMetrics {
    registry: Registry,
    reservations: IntCounterVec,
    settlements: IntCounterVec,
    ticks: IntCounterVec,
    logins: IntCounterVec,
    callbacks: IntCounterVec,
    active_tasks: IntGauge,
}

impl ReconciliationMetrics {
    pub fn new() -> AppResult<Self> {
        let registry = Registry::new();

        let reservations = IntCounterVec::new(
            Opts::new("scanpay_reservations_total", "Amount reservations by outcome"),
            &["outcome"],
        )?;
        let settlements = IntCounterVec::new(
            Opts::new("scanpay_orders_settled_total", "Orders reaching a terminal state"),
            &["state"],
        )?;
        let ticks = IntCounterVec::new(
            Opts::new("scanpay_monitor_ticks_total", "Monitor poll ticks by outcome"),
            &["outcome"],
        )?;
        let logins = IntCounterVec::new(
            Opts::new("scanpay_session_logins_total", "Provider login attempts by outcome"),
            &["provider", "outcome"],
        )?;
        let callbacks = IntCounterVec::new(
            Opts::new("scanpay_callbacks_total", "Merchant callbacks by outcome"),
            &["outcome"],
        )?;
        let active_tasks = IntGauge::new("scanpay_active_tasks", "Registered monitor tasks")?;

        registry.register(Box::new(reservations.clone()))?;
        registry.register(Box::new(settlements.clone()))?;
        registry.register(Box::new(ticks.clone()))?;
        registry.register(Box::new(logins.clone()))?;
        registry.register(Box::new(callbacks.clone()))?;
        registry.register(Box::new(active_tasks.clone()))?;

        Ok(Self {
            registry,
            reservations,
            settlements,
            ticks,
            logins,
            callbacks,
            active_tasks,
        })
    }

    /// `made`, `exhausted` or `released`
    pub fn record_reservation(&self, outcome: &str) {
        self.reservations.with_label_values(&[outcome]).inc();
    }

    pub fn record_settlement(&self, state: OrderState) {
        self.settlements.with_label_values(&[state.as_str()]).inc();
    }

    /// `matched`, `no_match`, `provider_error` or `session_error`
    pub fn record_tick(&self, outcome: &str) {
        self.ticks.with_label_values(&[outcome]).inc();
    }

    pub fn record_login(&self, provider: &str, outcome: &str) {
        self.logins.with_label_values(&[provider, outcome]).inc();
    }

    pub fn record_callback(&self, outcome: &str) {
        self.callbacks.with_label_values(&[outcome]).inc();
    }

    pub fn set_active_tasks(&self, count: usize) {
        self.active_tasks.set(count as i64);
    }

    pub fn settlement_count(&self, state: OrderState) -> u64 {
        self.settlements.with_label_values(&[state.as_str()]).get()
    }

    pub fn tick_count(&self, outcome: &str) -> u64 {
        self.ticks.with_label_values(&[outcome]).get()
    }

    pub fn reservation_count(&self, outcome: &str) -> u64 {
        self.reservations.with_label_values(&[outcome]).get()
    }

    pub fn callback_count(&self, outcome: &str) -> u64 {
        self.callbacks.with_label_values(&[outcome]).get()
    }

    pub fn active_tasks(&self) -> i64 {
        self.active_tasks.get()
    }

    /// Prometheus text exposition of every metric.
    pub fn gather_text(&self) -> AppResult<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer)
            .map_err(|e| AppError::Internal(format!("metrics output is not UTF-8: {}", e)))
    }
}
