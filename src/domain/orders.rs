//! Payment order domain models

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::provider::ProviderKind;

/// Order lifecycle state. Only `Pending` may transition.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum OrderState {
    Pending,
    Paid,
    Failed,
    Canceled,
}

impl OrderState {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderState::Pending => "pending",
            OrderState::Paid => "paid",
            OrderState::Failed => "failed",
            OrderState::Canceled => "canceled",
        }
    }

    /// Numeric code stored by the merchant admin tables.
    pub fn code(&self) -> u8 {
        match self {
            OrderState::Pending => 0,
            OrderState::Paid => 1,
            OrderState::Failed => 2,
            OrderState::Canceled => 3,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, OrderState::Pending)
    }
}

impl std::fmt::Display for OrderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payment order persisted in the order store
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaymentOrder {
    /// System-assigned id
    pub id: i64,
    /// Caller-supplied id, unique per merchant
    pub order_id: String,
    pub merchant_id: i64,
    pub provider: ProviderKind,
    /// Nominal amount the payer intends to pay
    pub requested_amount: Decimal,
    /// Collision-free amount shown on the QR code
    pub reserved_amount: Decimal,
    pub state: OrderState,
    pub created_at: DateTime<Utc>,
    pub pay_time: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
}

impl PaymentOrder {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn handle(&self) -> OrderHandle {
        OrderHandle {
            id: self.id,
            order_id: self.order_id.clone(),
            merchant_id: self.merchant_id,
        }
    }

    pub fn view(&self) -> OrderStateView {
        OrderStateView {
            order_id: self.order_id.clone(),
            state: self.state,
            requested_amount: self.requested_amount,
            reserved_amount: self.reserved_amount,
            pay_time: self.pay_time,
        }
    }
}

/// Fields supplied when an order is first written.
#[derive(Debug, Clone)]
pub struct NewPaymentOrder {
    pub order_id: String,
    pub merchant_id: i64,
    pub provider: ProviderKind,
    pub requested_amount: Decimal,
    pub reserved_amount: Decimal,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Partial update applied by monitors and cancel requests.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderUpdate {
    pub id: i64,
    pub state: OrderState,
    pub pay_time: Option<DateTime<Utc>>,
}

impl OrderUpdate {
    pub fn paid(id: i64, pay_time: DateTime<Utc>) -> Self {
        Self {
            id,
            state: OrderState::Paid,
            pay_time: Some(pay_time),
        }
    }

    pub fn failed(id: i64) -> Self {
        Self {
            id,
            state: OrderState::Failed,
            pay_time: None,
        }
    }

    pub fn canceled(id: i64) -> Self {
        Self {
            id,
            state: OrderState::Canceled,
            pay_time: None,
        }
    }
}

/// Reference handed back to the caller after allocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderHandle {
    pub id: i64,
    pub order_id: String,
    pub merchant_id: i64,
}

/// Read-only projection returned to the API layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderStateView {
    pub order_id: String,
    pub state: OrderState,
    pub requested_amount: Decimal,
    pub reserved_amount: Decimal,
    pub pay_time: Option<DateTime<Utc>>,
}

/// Result of a cancel request that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Canceled,
    AlreadyCanceled,
    /// The order reached another terminal state first.
    AlreadyTerminal(OrderState),
}

/// Identity of the authenticated caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Principal {
    pub merchant_id: i64,
}

impl Principal {
    pub fn merchant(merchant_id: i64) -> Self {
        Self { merchant_id }
    }

    pub fn owns(&self, order: &PaymentOrder) -> bool {
        order.merchant_id == self.merchant_id
    }
}
