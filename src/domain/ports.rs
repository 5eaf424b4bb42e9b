//! Collaborator interfaces
//!
//! The engine talks to its key-value store, the order and merchant tables,
//! the provider portals and the callback transport only through these
//! traits. Adapters live in `infrastructure::adapters`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::merchants::MerchantAccount;
use crate::domain::orders::{NewPaymentOrder, OrderUpdate, PaymentOrder};
use crate::domain::provider::{LoginGrant, ProviderKind, ProviderSession};
use crate::shared::error::{AppError, AppResult};

/// String key-value store with TTLs and atomic set-if-absent.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Atomically create `key` unless it exists. Returns whether it was created.
    async fn create_if_absent(&self, key: &str, value: &str, ttl: Duration) -> AppResult<bool>;

    async fn get(&self, key: &str) -> AppResult<Option<String>>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> AppResult<()>;

    /// Returns whether a key was removed.
    async fn delete(&self, key: &str) -> AppResult<bool>;

    /// Atomically delete `key` only while it still holds `expected`.
    /// Returns whether it was removed.
    async fn delete_if_value(&self, key: &str, expected: &str) -> AppResult<bool>;

    /// All live keys starting with `prefix`.
    async fn scan_prefix(&self, prefix: &str) -> AppResult<Vec<String>>;

    async fn ping(&self) -> AppResult<()>;
}

/// Relational order table.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Fails with `Validation` when the merchant already has this order id.
    async fn insert(&self, order: NewPaymentOrder) -> AppResult<PaymentOrder>;

    async fn get(&self, id: i64) -> AppResult<Option<PaymentOrder>>;

    async fn find_by_order_id(
        &self,
        merchant_id: i64,
        order_id: &str,
    ) -> AppResult<Option<PaymentOrder>>;

    /// Apply a terminal transition while the order is still pending.
    /// Returns whether it was applied; `NotFound` when the id is unknown.
    async fn transition(&self, update: OrderUpdate) -> AppResult<bool>;
}

/// Merchant account table.
#[async_trait]
pub trait MerchantAccountStore: Send + Sync {
    async fn get(&self, merchant_id: i64) -> AppResult<Option<MerchantAccount>>;
}

/// Client of one merchant portal.
#[async_trait]
pub trait ProviderGateway: Send + Sync {
    fn kind(&self) -> ProviderKind;

    async fn login(&self, username: &str, password: &str) -> AppResult<LoginGrant>;

    /// Whether the portal still accepts the session.
    async fn check_session(&self, session: &ProviderSession) -> bool;

    /// Raw order-list body for `[start, end]`.
    async fn fetch_orders(
        &self,
        session: &ProviderSession,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> AppResult<String>;
}

/// JSON POST transport for merchant callbacks. Returns the HTTP status.
#[async_trait]
pub trait CallbackSender: Send + Sync {
    async fn post_json(&self, url: &str, body: &serde_json::Value) -> AppResult<u16>;
}

/// Gateways keyed by provider.
#[derive(Clone, Default)]
pub struct ProviderGateways {
    gateways: HashMap<ProviderKind, Arc<dyn ProviderGateway>>,
}

impl ProviderGateways {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, gateway: Arc<dyn ProviderGateway>) {
        self.gateways.insert(gateway.kind(), gateway);
    }

    pub fn with(mut self, gateway: Arc<dyn ProviderGateway>) -> Self {
        self.register(gateway);
        self
    }

    pub fn get(&self, kind: ProviderKind) -> AppResult<Arc<dyn ProviderGateway>> {
        self.gateways.get(&kind).cloned().ok_or_else(|| {
            AppError::Configuration(format!("no gateway registered for provider {}", kind))
        })
    }

    pub fn len(&self) -> usize {
        self.gateways.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gateways.is_empty()
    }
}
