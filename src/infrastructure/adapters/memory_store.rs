//! In-memory stores
//!
//! Process-local implementations of the collaborator traits. Used by the
//! standalone daemon for order and merchant tables and by tests for all
//! three stores.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::domain::merchants::MerchantAccount;
use crate::domain::orders::{NewPaymentOrder, OrderState, OrderUpdate, PaymentOrder};
use crate::domain::ports::{KeyValueStore, MerchantAccountStore, OrderStore};
use crate::shared::error::{AppError, AppResult};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Key-value store with TTLs measured on the tokio clock.
#[derive(Clone, Default)]
pub struct MemoryKeyValueStore {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.read().await.values().filter(|e| e.is_live(now)).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn create_if_absent(&self, key: &str, value: &str, ttl: Duration) -> AppResult<bool> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|e| e.is_live(now)) {
            return Ok(false);
        }
        entries.retain(|_, e| e.is_live(now));
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: now + ttl,
            },
        );
        Ok(true)
    }

    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        let now = Instant::now();
        Ok(self
            .entries
            .read()
            .await
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> AppResult<()> {
        let entry = Entry {
            value: value.to_string(),
            expires_at: Instant::now() + ttl,
        };
        self.entries.write().await.insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> AppResult<bool> {
        let now = Instant::now();
        Ok(self
            .entries
            .write()
            .await
            .remove(key)
            .is_some_and(|e| e.is_live(now)))
    }

    async fn delete_if_value(&self, key: &str, expected: &str) -> AppResult<bool> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|e| e.is_live(now) && e.value == expected) {
            entries.remove(key);
            return Ok(true);
        }
        Ok(false)
    }

    async fn scan_prefix(&self, prefix: &str) -> AppResult<Vec<String>> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        entries.retain(|_, e| e.is_live(now));
        let mut keys: Vec<String> = entries
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn ping(&self) -> AppResult<()> {
        Ok(())
    }
}

/// Order table keyed by system id.
#[derive(Clone)]
pub struct MemoryOrderStore {
    orders: Arc<RwLock<HashMap<i64, PaymentOrder>>>,
    next_id: Arc<AtomicI64>,
}

impl Default for MemoryOrderStore {
    fn default() -> Self {
        Self {
            orders: Arc::new(RwLock::new(HashMap::new())),
            next_id: Arc::new(AtomicI64::new(1)),
        }
    }
}

impl MemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.orders.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn pending_count(&self, merchant_id: i64) -> usize {
        self.orders
            .read()
            .await
            .values()
            .filter(|o| o.merchant_id == merchant_id && o.state == OrderState::Pending)
            .count()
    }
}

#[async_trait]
impl OrderStore for MemoryOrderStore {
    async fn insert(&self, order: NewPaymentOrder) -> AppResult<PaymentOrder> {
        let mut orders = self.orders.write().await;
        let duplicate = orders
            .values()
            .any(|o| o.merchant_id == order.merchant_id && o.order_id == order.order_id);
        if duplicate {
            return Err(AppError::Validation(format!(
                "order id {} already exists for merchant {}",
                order.order_id, order.merchant_id
            )));
        }

        let stored = PaymentOrder {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            order_id: order.order_id,
            merchant_id: order.merchant_id,
            provider: order.provider,
            requested_amount: order.requested_amount,
            reserved_amount: order.reserved_amount,
            state: OrderState::Pending,
            created_at: order.created_at,
            pay_time: None,
            expires_at: order.expires_at,
        };
        orders.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn get(&self, id: i64) -> AppResult<Option<PaymentOrder>> {
        Ok(self.orders.read().await.get(&id).cloned())
    }

    async fn find_by_order_id(
        &self,
        merchant_id: i64,
        order_id: &str,
    ) -> AppResult<Option<PaymentOrder>> {
        Ok(self
            .orders
            .read()
            .await
            .values()
            .find(|o| o.merchant_id == merchant_id && o.order_id == order_id)
            .cloned())
    }

    async fn transition(&self, update: OrderUpdate) -> AppResult<bool> {
        let mut orders = self.orders.write().await;
        let order = orders
            .get_mut(&update.id)
            .ok_or_else(|| AppError::NotFound(format!("order {}", update.id)))?;
        if order.state.is_terminal() {
            return Ok(false);
        }
        order.state = update.state;
        if update.pay_time.is_some() {
            order.pay_time = update.pay_time;
        }
        Ok(true)
    }
}

/// Merchant account table.
#[derive(Clone, Default)]
pub struct MemoryMerchantStore {
    accounts: Arc<RwLock<HashMap<i64, MerchantAccount>>>,
}

impl MemoryMerchantStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn upsert(&self, account: MerchantAccount) {
        self.accounts.write().await.insert(account.merchant_id, account);
    }
}

#[async_trait]
impl MerchantAccountStore for MemoryMerchantStore {
    async fn get(&self, merchant_id: i64) -> AppResult<Option<MerchantAccount>> {
        Ok(self.accounts.read().await.get(&merchant_id).cloned())
    }
}
