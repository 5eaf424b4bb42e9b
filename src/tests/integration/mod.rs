//! Integration tests for the reconciliation engine
//!
//! Each scenario runs the real scheduler, allocator, session manager and
//! monitors over in-memory stores and a scripted portal, on the paused
//! tokio clock.

use crate::{
    application::{MonitorKey, ReserveRequest, Scheduler},
    domain::{
        orders::{CancelOutcome, NewPaymentOrder, OrderState, Principal},
        ports::{KeyValueStore, OrderStore},
        provider::ProviderKind,
        reservation::DecimalRange,
    },
    shared::error::AppError,
    tests::common::{TestHarness, MERCHANT_ID},
};
use chrono::Utc;
use rust_decimal_macros::dec;
use std::time::Duration;
use tokio::time::sleep;

const CALLBACK_URL: &str = "https://merchant.example/notify";

fn request(order_id: &str) -> ReserveRequest {
    ReserveRequest::new(MERCHANT_ID, order_id, dec!(5))
}

#[tokio::test(start_paused = true)]
async fn test_matching_payment_marks_paid() {
    let h = TestHarness::new(ProviderKind::Xianxiang).await;
    let (amount, handle) = h.engine.allocate_and_reserve(request("A-1")).await.unwrap();
    assert_eq!(h.reservation(amount).await.as_deref(), Some("A-1"));

    h.engine.start_monitoring(&handle, Some(CALLBACK_URL)).await.unwrap();
    let paid_at = Utc::now();
    h.gateway.push_payment("P-100", &amount.to_string(), paid_at);

    assert!(h.wait_for_state(handle.id, OrderState::Paid, Duration::from_secs(15)).await);
    assert!(h.wait_for_callbacks(1, Duration::from_secs(1)).await);

    let order = h.orders.get(handle.id).await.unwrap().unwrap();
    assert_eq!(
        order.pay_time.map(|t| t.timestamp()),
        Some(paid_at.timestamp())
    );
    assert_eq!(h.reservation(amount).await, None);
    assert!(!h.engine.registry().contains(MonitorKey::Order(handle.id)));

    let calls = h.sender.calls();
    assert_eq!(calls[0].0, CALLBACK_URL);
    assert_eq!(calls[0].1["orderId"], "A-1");
    assert_eq!(calls[0].1["transactionId"], handle.id);
    assert_eq!(calls[0].1["paymentMethod"], "2");
    assert_eq!(h.engine.metrics().settlement_count(OrderState::Paid), 1);
}

#[tokio::test(start_paused = true)]
async fn test_xingyi_payload_matches() {
    let h = TestHarness::new(ProviderKind::Xingyi).await;
    let (amount, handle) = h.engine.allocate_and_reserve(request("X-1")).await.unwrap();
    h.engine.start_monitoring(&handle, None).await.unwrap();
    h.gateway.push_payment("R-1", &amount.to_string(), Utc::now());

    assert!(h.wait_for_state(handle.id, OrderState::Paid, Duration::from_secs(15)).await);
    // no callback URL, nothing posted
    sleep(Duration::from_secs(1)).await;
    assert!(h.sender.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_no_false_match() {
    let h = TestHarness::new(ProviderKind::Xianxiang).await;
    let (amount, handle) = h.engine.allocate_and_reserve(request("A-1")).await.unwrap();
    h.engine.start_monitoring(&handle, Some(CALLBACK_URL)).await.unwrap();

    // right time, wrong amount
    h.gateway.push_payment("P-1", &(amount + dec!(0.01)).to_string(), Utc::now());
    // right amount, before the window opened
    h.gateway
        .push_payment("P-2", &amount.to_string(), Utc::now() - chrono::Duration::hours(1));

    sleep(Duration::from_secs(35)).await;
    assert_eq!(h.state_of(handle.id).await, OrderState::Pending);
    assert!(h.gateway.fetch_calls() >= 3);
    assert!(h.engine.metrics().tick_count("no_match") >= 3);
    assert_eq!(h.reservation(amount).await.as_deref(), Some("A-1"));
}

#[tokio::test(start_paused = true)]
async fn test_expiry_marks_failed_once() {
    let h = TestHarness::new(ProviderKind::Xianxiang).await;
    let (amount, handle) = h
        .engine
        .allocate_and_reserve(request("A-1").with_ttl(Duration::from_secs(60)))
        .await
        .unwrap();
    h.engine.start_monitoring(&handle, Some(CALLBACK_URL)).await.unwrap();

    sleep(Duration::from_secs(59)).await;
    assert_eq!(h.state_of(handle.id).await, OrderState::Pending);

    assert!(h.wait_for_state(handle.id, OrderState::Failed, Duration::from_secs(2)).await);
    assert_eq!(h.reservation(amount).await, None);
    assert!(!h.engine.stop_monitoring(MonitorKey::Order(handle.id)));

    sleep(Duration::from_secs(60)).await;
    assert_eq!(h.engine.metrics().settlement_count(OrderState::Failed), 1);
    assert!(h.sender.calls().is_empty());
    assert_eq!(h.scheduler.active_jobs(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_provider_errors_are_retried_next_tick() {
    let h = TestHarness::new(ProviderKind::Xianxiang).await;
    let (amount, handle) = h.engine.allocate_and_reserve(request("A-1")).await.unwrap();
    h.gateway.fail_next_fetches(2);
    h.gateway.push_payment("P-1", &amount.to_string(), Utc::now());
    h.engine.start_monitoring(&handle, None).await.unwrap();

    sleep(Duration::from_secs(25)).await;
    assert_eq!(h.state_of(handle.id).await, OrderState::Pending);
    assert_eq!(h.engine.metrics().tick_count("provider_error"), 2);

    assert!(h.wait_for_state(handle.id, OrderState::Paid, Duration::from_secs(10)).await);
}

#[tokio::test(start_paused = true)]
async fn test_session_failure_skips_tick() {
    let h = TestHarness::new(ProviderKind::Xianxiang).await;
    let (_, handle) = h.engine.allocate_and_reserve(request("A-1")).await.unwrap();
    h.gateway.fail_next_logins(1000);
    h.engine.start_monitoring(&handle, None).await.unwrap();

    sleep(Duration::from_secs(25)).await;
    assert_eq!(h.state_of(handle.id).await, OrderState::Pending);
    assert!(h.engine.metrics().tick_count("session_error") >= 1);
    assert_eq!(h.gateway.fetch_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_releases_and_is_idempotent() {
    let h = TestHarness::new(ProviderKind::Xianxiang).await;
    let (amount, handle) = h.engine.allocate_and_reserve(request("A-1")).await.unwrap();
    h.engine.start_monitoring(&handle, Some(CALLBACK_URL)).await.unwrap();

    let outcome = h.engine.cancel_order(&h.principal(), handle.id).await.unwrap();
    assert_eq!(outcome, CancelOutcome::Canceled);
    assert_eq!(h.state_of(handle.id).await, OrderState::Canceled);
    assert_eq!(h.reservation(amount).await, None);
    assert!(!h.engine.registry().contains(MonitorKey::Order(handle.id)));

    let again = h.engine.cancel_order(&h.principal(), handle.id).await.unwrap();
    assert_eq!(again, CancelOutcome::AlreadyCanceled);

    sleep(Duration::from_secs(30)).await;
    assert_eq!(h.gateway.fetch_calls(), 0);
    assert_eq!(h.engine.metrics().settlement_count(OrderState::Canceled), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_without_monitor() {
    let h = TestHarness::new(ProviderKind::Xianxiang).await;
    let (amount, handle) = h.engine.allocate_and_reserve(request("A-1")).await.unwrap();

    let outcome = h.engine.cancel_order(&h.principal(), handle.id).await.unwrap();
    assert_eq!(outcome, CancelOutcome::Canceled);
    assert_eq!(h.reservation(amount).await, None);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_checks_ownership() {
    let h = TestHarness::new(ProviderKind::Xianxiang).await;
    let (amount, handle) = h.engine.allocate_and_reserve(request("A-1")).await.unwrap();

    let result = h.engine.cancel_order(&Principal::merchant(7), handle.id).await;
    assert!(matches!(result, Err(AppError::Forbidden(_))));
    assert_eq!(h.state_of(handle.id).await, OrderState::Pending);
    assert!(h.reservation(amount).await.is_some());

    let missing = h.engine.cancel_order(&h.principal(), 9999).await;
    assert!(matches!(missing, Err(AppError::NotFound(_))));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_after_paid_is_noop() {
    let h = TestHarness::new(ProviderKind::Xianxiang).await;
    let (amount, handle) = h.engine.allocate_and_reserve(request("A-1")).await.unwrap();
    h.gateway.push_payment("P-1", &amount.to_string(), Utc::now());
    h.engine.start_monitoring(&handle, None).await.unwrap();
    assert!(h.wait_for_state(handle.id, OrderState::Paid, Duration::from_secs(15)).await);

    let outcome = h.engine.cancel_order(&h.principal(), handle.id).await.unwrap();
    assert_eq!(outcome, CancelOutcome::AlreadyTerminal(OrderState::Paid));
    assert_eq!(h.state_of(handle.id).await, OrderState::Paid);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_racing_watchdog_settles_once() {
    let h = TestHarness::new(ProviderKind::Xianxiang).await;
    let ttl = Duration::from_secs(30);
    let (amount, handle) = h
        .engine
        .allocate_and_reserve(request("A-1").with_ttl(ttl))
        .await
        .unwrap();
    h.engine.start_monitoring(&handle, None).await.unwrap();

    sleep(ttl).await;
    let outcome = h.engine.cancel_order(&h.principal(), handle.id).await.unwrap();
    sleep(Duration::from_secs(1)).await;

    let state = h.state_of(handle.id).await;
    match outcome {
        CancelOutcome::Canceled => assert_eq!(state, OrderState::Canceled),
        CancelOutcome::AlreadyTerminal(OrderState::Failed) => assert_eq!(state, OrderState::Failed),
        other => panic!("unexpected outcome {:?}", other),
    }

    let metrics = h.engine.metrics();
    assert_eq!(
        metrics.settlement_count(OrderState::Failed) + metrics.settlement_count(OrderState::Canceled),
        1
    );
    assert_eq!(h.reservation(amount).await, None);
    assert_eq!(h.scheduler.active_jobs(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_stale_cancel_keeps_new_holder_lease() {
    let h = TestHarness::new(ProviderKind::Xianxiang).await;
    let range = DecimalRange::new(5, 5);
    let (amount, stale) = h
        .engine
        .allocate_and_reserve(request("A-1").with_range(range).with_ttl(Duration::from_secs(60)))
        .await
        .unwrap();

    // the lease lapses before anything settles A-1
    sleep(Duration::from_secs(61)).await;
    let (retaken, _) = h
        .engine
        .allocate_and_reserve(request("B-1").with_range(range))
        .await
        .unwrap();
    assert_eq!(retaken, amount);

    let outcome = h.engine.cancel_order(&h.principal(), stale.id).await.unwrap();
    assert_eq!(outcome, CancelOutcome::Canceled);
    assert_eq!(h.reservation(amount).await.as_deref(), Some("B-1"));

    let third = h
        .engine
        .allocate_and_reserve(request("C-1").with_range(range))
        .await;
    assert!(matches!(third, Err(AppError::AllocationExhausted { .. })));
    assert_eq!(h.engine.metrics().reservation_count("released"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_watchdog_keeps_lease_taken_by_another_order() {
    let h = TestHarness::new(ProviderKind::Xianxiang).await;
    let range = DecimalRange::new(5, 5);
    let (amount, stale) = h
        .engine
        .allocate_and_reserve(request("A-1").with_range(range).with_ttl(Duration::from_secs(60)))
        .await
        .unwrap();
    h.engine.start_monitoring(&stale, None).await.unwrap();

    // the store drops the lease early and B-1 takes the amount
    let key = h.engine.allocator().keys().key(MERCHANT_ID, amount);
    h.kv.delete(&key).await.unwrap();
    let (retaken, _) = h
        .engine
        .allocate_and_reserve(request("B-1").with_range(range))
        .await
        .unwrap();
    assert_eq!(retaken, amount);

    assert!(h.wait_for_state(stale.id, OrderState::Failed, Duration::from_secs(62)).await);
    assert_eq!(h.reservation(amount).await.as_deref(), Some("B-1"));
}

#[tokio::test(start_paused = true)]
async fn test_losing_sweep_settle_keeps_new_holder_lease() {
    let h = TestHarness::new(ProviderKind::Xianxiang).await;
    let range = DecimalRange::new(5, 5);
    let (amount, first) = h
        .engine
        .allocate_and_reserve(request("A-1").with_range(range))
        .await
        .unwrap();
    h.gateway.push_payment("P-1", &amount.to_string(), Utc::now());
    h.gateway.set_fetch_delay(Duration::from_secs(5));
    h.engine.start_merchant_sweep(MERCHANT_ID, None).await.unwrap();

    // the sweep's query for A-1 is in flight from 30s to 35s
    sleep(Duration::from_secs(31)).await;
    assert_eq!(h.gateway.fetch_calls(), 1);
    let outcome = h.engine.cancel_order(&h.principal(), first.id).await.unwrap();
    assert_eq!(outcome, CancelOutcome::Canceled);
    let (retaken, _) = h
        .engine
        .allocate_and_reserve(request("B-1").with_range(range))
        .await
        .unwrap();
    assert_eq!(retaken, amount);

    sleep(Duration::from_secs(5)).await;
    assert_eq!(h.state_of(first.id).await, OrderState::Canceled);
    assert_eq!(h.engine.metrics().settlement_count(OrderState::Paid), 0);
    assert_eq!(h.reservation(amount).await.as_deref(), Some("B-1"));
}

#[tokio::test(start_paused = true)]
async fn test_start_monitoring_dedups() {
    let h = TestHarness::new(ProviderKind::Xianxiang).await;
    let (_, handle) = h.engine.allocate_and_reserve(request("A-1")).await.unwrap();

    let first = h.engine.start_monitoring(&handle, None).await.unwrap();
    let second = h.engine.start_monitoring(&handle, Some(CALLBACK_URL)).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(h.engine.registry().len(), 1);
    // one poll timer plus one watchdog
    assert_eq!(h.scheduler.active_jobs(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_start_monitoring_rejects_terminal_order() {
    let h = TestHarness::new(ProviderKind::Xianxiang).await;
    let (_, handle) = h.engine.allocate_and_reserve(request("A-1")).await.unwrap();
    h.engine.cancel_order(&h.principal(), handle.id).await.unwrap();

    let result = h.engine.start_monitoring(&handle, None).await;
    assert!(matches!(
        result,
        Err(AppError::AlreadyTerminal { state: OrderState::Canceled, .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_allocation_exhaustion() {
    let h = TestHarness::new(ProviderKind::Xianxiang).await;
    let range = DecimalRange::new(1, 3);

    let mut amounts = Vec::new();
    for n in 0..3 {
        let (amount, _) = h
            .engine
            .allocate_and_reserve(request(&format!("A-{}", n)).with_range(range))
            .await
            .unwrap();
        amounts.push(amount);
    }
    amounts.sort();
    assert_eq!(amounts, vec![dec!(5.01), dec!(5.02), dec!(5.03)]);

    let result = h
        .engine
        .allocate_and_reserve(request("A-3").with_range(range))
        .await;
    assert!(matches!(result, Err(AppError::AllocationExhausted { merchant_id: MERCHANT_ID, .. })));
    assert_eq!(h.kv.len().await, 3);
    assert_eq!(h.orders.len().await, 3);
}

#[tokio::test(start_paused = true)]
async fn test_allocation_validation() {
    let h = TestHarness::new(ProviderKind::Xianxiang).await;

    let too_large = ReserveRequest::new(MERCHANT_ID, "A-1", dec!(10000));
    assert!(matches!(
        h.engine.allocate_and_reserve(too_large).await,
        Err(AppError::Validation(_))
    ));

    let unknown = ReserveRequest::new(7, "A-1", dec!(5));
    assert!(matches!(
        h.engine.allocate_and_reserve(unknown).await,
        Err(AppError::NotFound(_))
    ));

    let inverted = request("A-1").with_range(DecimalRange::new(9, 2));
    assert!(matches!(
        h.engine.allocate_and_reserve(inverted).await,
        Err(AppError::Configuration(_))
    ));
    assert!(h.kv.is_empty().await);
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_order_id_releases_reservation() {
    let h = TestHarness::new(ProviderKind::Xianxiang).await;
    h.engine.allocate_and_reserve(request("A-1")).await.unwrap();

    let result = h.engine.allocate_and_reserve(request("A-1")).await;
    assert!(matches!(result, Err(AppError::Validation(_))));
    assert_eq!(h.kv.len().await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_zero_ttl_uses_default() {
    let h = TestHarness::new(ProviderKind::Xianxiang).await;
    let (_, handle) = h
        .engine
        .allocate_and_reserve(request("A-1").with_ttl(Duration::ZERO))
        .await
        .unwrap();

    let order = h.orders.get(handle.id).await.unwrap().unwrap();
    assert_eq!((order.expires_at - order.created_at).num_seconds(), 300);
}

#[tokio::test(start_paused = true)]
async fn test_get_order_state_is_scoped() {
    let h = TestHarness::new(ProviderKind::Xianxiang).await;
    let (amount, _) = h.engine.allocate_and_reserve(request("A-1")).await.unwrap();

    let view = h.engine.get_order_state(&h.principal(), "A-1").await.unwrap();
    assert_eq!(view.state, OrderState::Pending);
    assert_eq!(view.requested_amount, dec!(5));
    assert_eq!(view.reserved_amount, amount);
    assert_eq!(view.pay_time, None);

    let foreign = h.engine.get_order_state(&Principal::merchant(7), "A-1").await;
    assert!(matches!(foreign, Err(AppError::NotFound(_))));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_tasks_and_keeps_reservations() {
    let h = TestHarness::new(ProviderKind::Xianxiang).await;
    let (a1, h1) = h.engine.allocate_and_reserve(request("A-1")).await.unwrap();
    let (_, h2) = h.engine.allocate_and_reserve(request("A-2")).await.unwrap();
    h.engine.start_monitoring(&h1, None).await.unwrap();
    h.engine.start_monitoring(&h2, None).await.unwrap();
    h.engine.start_merchant_sweep(MERCHANT_ID, None).await.unwrap();

    assert_eq!(h.engine.shutdown(), 3);
    assert!(h.engine.registry().is_empty());

    sleep(Duration::from_secs(60)).await;
    assert_eq!(h.scheduler.active_jobs(), 0);
    assert_eq!(h.gateway.fetch_calls(), 0);
    assert_eq!(h.state_of(h1.id).await, OrderState::Pending);
    assert_eq!(h.reservation(a1).await.as_deref(), Some("A-1"));
}

#[tokio::test(start_paused = true)]
async fn test_merchant_sweep_settles_reservations() {
    let h = TestHarness::new(ProviderKind::Xianxiang).await;
    let (paid_amount, paid) = h.engine.allocate_and_reserve(request("A-1")).await.unwrap();
    let (open_amount, open) = h.engine.allocate_and_reserve(request("A-2")).await.unwrap();

    // an order whose lifetime is already over, reserved directly
    let now = Utc::now();
    let stale = h
        .orders
        .insert(NewPaymentOrder {
            order_id: "A-3".to_string(),
            merchant_id: MERCHANT_ID,
            provider: ProviderKind::Xianxiang,
            requested_amount: dec!(7),
            reserved_amount: dec!(7.50),
            created_at: now - chrono::Duration::minutes(10),
            expires_at: now - chrono::Duration::minutes(5),
        })
        .await
        .unwrap();
    h.kv
        .create_if_absent("pay_amount_used:42:7.50", "A-3", Duration::from_secs(300))
        .await
        .unwrap();

    h.gateway.push_payment("P-1", &paid_amount.to_string(), Utc::now());
    let first = h.engine.start_merchant_sweep(MERCHANT_ID, Some(CALLBACK_URL)).await.unwrap();
    let second = h.engine.start_merchant_sweep(MERCHANT_ID, None).await.unwrap();
    assert_eq!(first, second);

    assert!(h.wait_for_state(paid.id, OrderState::Paid, Duration::from_secs(35)).await);
    assert!(h.wait_for_state(stale.id, OrderState::Failed, Duration::from_secs(1)).await);
    assert!(h.wait_for_callbacks(1, Duration::from_secs(1)).await);

    assert_eq!(h.state_of(open.id).await, OrderState::Pending);
    assert_eq!(h.reservation(paid_amount).await, None);
    assert_eq!(h.reservation(open_amount).await.as_deref(), Some("A-2"));
    assert_eq!(h.kv.get("pay_amount_used:42:7.50").await.unwrap(), None);
    assert!(h.engine.registry().contains(MonitorKey::Merchant(MERCHANT_ID)));
}

#[tokio::test(start_paused = true)]
async fn test_sweep_leaves_monitored_orders_alone() {
    let h = TestHarness::new(ProviderKind::Xianxiang).await;
    let (amount, handle) = h.engine.allocate_and_reserve(request("A-1")).await.unwrap();
    h.gateway.fail_next_fetches(1000);
    h.engine.start_monitoring(&handle, None).await.unwrap();
    h.engine.start_merchant_sweep(MERCHANT_ID, None).await.unwrap();

    sleep(Duration::from_secs(31)).await;
    // three poll ticks, no sweep query
    assert_eq!(h.gateway.fetch_calls(), 3);
    assert_eq!(h.reservation(amount).await.as_deref(), Some("A-1"));
}

#[tokio::test(start_paused = true)]
async fn test_sweep_requires_known_merchant() {
    let h = TestHarness::new(ProviderKind::Xianxiang).await;
    let result = h.engine.start_merchant_sweep(7, None).await;
    assert!(matches!(result, Err(AppError::NotFound(_))));
}

#[tokio::test(start_paused = true)]
async fn test_health_reports_tasks() {
    let h = TestHarness::new(ProviderKind::Xianxiang).await;
    let (_, handle) = h.engine.allocate_and_reserve(request("A-1")).await.unwrap();
    h.engine.start_monitoring(&handle, None).await.unwrap();

    let health = h.engine.health().await.unwrap();
    assert!(health.is_healthy());
    assert_eq!(health.details["active_tasks"], 1);
    assert!(!h.engine.start_health_probe().unwrap());
}
