//! Common test utilities and mock implementations
//!
//! Shared mocks and fixtures used by the unit tests of the services and by
//! the integration scenarios.

use crate::{
    application::{EngineDeps, ReconciliationEngine, TokioScheduler},
    config::AppConfig,
    domain::{
        callback::PaymentCallback,
        merchants::MerchantAccount,
        orders::{OrderState, Principal},
        ports::{CallbackSender, KeyValueStore, OrderStore, ProviderGateway, ProviderGateways},
        provider::{LoginGrant, ProviderKind, ProviderSession},
    },
    infrastructure::adapters::{MemoryKeyValueStore, MemoryMerchantStore, MemoryOrderStore},
    shared::{
        error::{AppError, AppResult},
        time::{format_provider_time, provider_offset},
    },
};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{sleep, Instant};

pub const MERCHANT_ID: i64 = 42;

/// One payment row the mock portal reports.
#[derive(Debug, Clone)]
struct ScriptedPayment {
    order_no: String,
    amount: String,
    at: DateTime<Utc>,
}

/// Scripted provider portal.
///
/// Logins hand out `token-N`; order lists are rendered in the portal's
/// own JSON layout from the payments pushed so far.
pub struct MockGateway {
    kind: ProviderKind,
    logins: AtomicUsize,
    failing_logins: AtomicUsize,
    session_valid: AtomicBool,
    hang_checks: AtomicBool,
    grant: Mutex<Option<LoginGrant>>,
    payments: Mutex<Vec<ScriptedPayment>>,
    raw_body: Mutex<Option<String>>,
    fetches: AtomicUsize,
    failing_fetches: AtomicUsize,
    fetch_delay: Mutex<Duration>,
}

impl MockGateway {
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            logins: AtomicUsize::new(0),
            failing_logins: AtomicUsize::new(0),
            session_valid: AtomicBool::new(true),
            hang_checks: AtomicBool::new(false),
            grant: Mutex::new(None),
            payments: Mutex::new(Vec::new()),
            raw_body: Mutex::new(None),
            fetches: AtomicUsize::new(0),
            failing_fetches: AtomicUsize::new(0),
            fetch_delay: Mutex::new(Duration::ZERO),
        }
    }

    pub fn login_calls(&self) -> usize {
        self.logins.load(Ordering::SeqCst)
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn set_session_valid(&self, valid: bool) {
        self.session_valid.store(valid, Ordering::SeqCst);
    }

    /// Make every later session check wait forever.
    pub fn hang_session_checks(&self, hang: bool) {
        self.hang_checks.store(hang, Ordering::SeqCst);
    }

    pub fn fail_next_logins(&self, count: usize) {
        self.failing_logins.store(count, Ordering::SeqCst);
    }

    pub fn fail_next_fetches(&self, count: usize) {
        self.failing_fetches.store(count, Ordering::SeqCst);
    }

    /// Hold every later order query for `delay` of tokio time.
    pub fn set_fetch_delay(&self, delay: Duration) {
        *self.fetch_delay.lock().unwrap() = delay;
    }

    pub fn set_grant(&self, grant: LoginGrant) {
        *self.grant.lock().unwrap() = Some(grant);
    }

    /// Report a received transfer of `amount` at `at`.
    pub fn push_payment(&self, order_no: &str, amount: &str, at: DateTime<Utc>) {
        self.payments.lock().unwrap().push(ScriptedPayment {
            order_no: order_no.to_string(),
            amount: amount.to_string(),
            at,
        });
    }

    /// Answer every fetch with `body` verbatim.
    pub fn set_raw_body(&self, body: &str) {
        *self.raw_body.lock().unwrap() = Some(body.to_string());
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn render(&self) -> String {
        if let Some(body) = self.raw_body.lock().unwrap().clone() {
            return body;
        }

        let offset = provider_offset(480).unwrap();
        let payments = self.payments.lock().unwrap().clone();
        match self.kind {
            ProviderKind::Xingyi => {
                let rows: Vec<Value> = payments
                    .iter()
                    .map(|p| {
                        json!({
                            "ORDER_TIME": format_provider_time(p.at, offset),
                            "REC_TXAMT": p.amount,
                            "ORDER_NO": p.order_no,
                            "ORDER_STATUS": "1",
                            "PAY_CHANNEL": "WX",
                            "TXAMT": p.amount,
                        })
                    })
                    .collect();
                json!({ "RSPCOD": "00000", "RSPMSG": "ok", "ROWLIST": rows }).to_string()
            }
            _ => {
                let rows: Vec<Value> = payments
                    .iter()
                    .enumerate()
                    .map(|(i, p)| {
                        json!({
                            "id": i + 1,
                            "order_sn": p.order_no,
                            "price": p.amount,
                            "real_price": p.amount,
                            "status": 1,
                            "pay_way": "alipay",
                            "create_at": format_provider_time(p.at, offset),
                            "pay_time": format_provider_time(p.at, offset),
                        })
                    })
                    .collect();
                json!({ "code": 200, "msg": "success", "data": { "data": rows } }).to_string()
            }
        }
    }
}

#[async_trait]
impl ProviderGateway for MockGateway {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn login(&self, username: &str, _password: &str) -> AppResult<LoginGrant> {
        let n = self.logins.fetch_add(1, Ordering::SeqCst) + 1;
        if Self::take_failure(&self.failing_logins) {
            return Err(AppError::ProviderIo(format!("login {} for {} rejected", n, username)));
        }
        Ok(self.grant.lock().unwrap().clone().unwrap_or(LoginGrant {
            token: format!("token-{}", n),
            expires_in: None,
        }))
    }

    async fn check_session(&self, _session: &ProviderSession) -> bool {
        if self.hang_checks.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.session_valid.load(Ordering::SeqCst)
    }

    async fn fetch_orders(
        &self,
        _session: &ProviderSession,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> AppResult<String> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let delay = *self.fetch_delay.lock().unwrap();
        if !delay.is_zero() {
            sleep(delay).await;
        }
        if Self::take_failure(&self.failing_fetches) {
            return Err(AppError::ProviderIo("connection reset".to_string()));
        }
        Ok(self.render())
    }
}

/// Callback transport that records every POST and answers with a fixed status.
pub struct RecordingSender {
    status: u16,
    calls: Mutex<Vec<(String, Value)>>,
}

impl RecordingSender {
    pub fn with_status(status: u16) -> Self {
        Self {
            status,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CallbackSender for RecordingSender {
    async fn post_json(&self, url: &str, body: &Value) -> AppResult<u16> {
        self.calls.lock().unwrap().push((url.to_string(), body.clone()));
        Ok(self.status)
    }
}

pub fn sample_callback() -> PaymentCallback {
    PaymentCallback {
        order_id: "A-1".to_string(),
        transaction_id: 1,
        amount: "5.37".to_string(),
        pay_time: Utc.with_ymd_and_hms(2025, 10, 8, 9, 0, 0).unwrap(),
        payment_method: ProviderKind::Xianxiang.code().to_string(),
        status: "success".to_string(),
    }
}

pub fn merchant(provider: ProviderKind) -> MerchantAccount {
    let mut account = MerchantAccount::new(MERCHANT_ID, provider, "shop42", "secret");
    account.min_amount = Some(Decimal::ONE);
    account.max_amount = Some(Decimal::from(5000));
    account
}

/// Engine over in-memory stores, a mock portal and a recording sender.
pub struct TestHarness {
    pub engine: ReconciliationEngine,
    pub kv: Arc<MemoryKeyValueStore>,
    pub orders: Arc<MemoryOrderStore>,
    pub merchants: Arc<MemoryMerchantStore>,
    pub gateway: Arc<MockGateway>,
    pub sender: Arc<RecordingSender>,
    pub scheduler: Arc<TokioScheduler>,
}

impl TestHarness {
    pub async fn new(provider: ProviderKind) -> Self {
        Self::with_config(provider, super::config::test_config()).await
    }

    pub async fn with_config(provider: ProviderKind, config: AppConfig) -> Self {
        super::config::init();

        let kv = Arc::new(MemoryKeyValueStore::new());
        let orders = Arc::new(MemoryOrderStore::new());
        let merchants = Arc::new(MemoryMerchantStore::new());
        let gateway = Arc::new(MockGateway::new(provider));
        let sender = Arc::new(RecordingSender::with_status(200));
        let scheduler = Arc::new(TokioScheduler::new());

        merchants.upsert(merchant(provider)).await;

        let engine = ReconciliationEngine::new(
            config,
            EngineDeps {
                kv: kv.clone(),
                orders: orders.clone(),
                merchants: merchants.clone(),
                gateways: ProviderGateways::new().with(gateway.clone()),
                callbacks: sender.clone(),
                scheduler: scheduler.clone(),
            },
        )
        .unwrap();

        Self {
            engine,
            kv,
            orders,
            merchants,
            gateway,
            sender,
            scheduler,
        }
    }
}

impl TestHarness {
    pub fn principal(&self) -> Principal {
        Principal::merchant(MERCHANT_ID)
    }

    pub async fn state_of(&self, id: i64) -> OrderState {
        self.orders.get(id).await.unwrap().unwrap().state
    }

    /// Poll the order store every 100ms of tokio time until `id` reaches
    /// `state` or `timeout` elapses.
    pub async fn wait_for_state(&self, id: i64, state: OrderState, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.state_of(id).await == state {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            sleep(Duration::from_millis(100)).await;
        }
    }

    pub async fn wait_for_callbacks(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.sender.calls().len() < count {
            if Instant::now() >= deadline {
                return false;
            }
            sleep(Duration::from_millis(100)).await;
        }
        true
    }

    pub async fn reservation(&self, amount: Decimal) -> Option<String> {
        let key = self.engine.allocator().keys().key(MERCHANT_ID, amount);
        self.kv.get(&key).await.unwrap()
    }
}
