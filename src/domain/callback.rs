//! Merchant payment notification payload

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::orders::PaymentOrder;
use crate::domain::reservation::format_amount;

/// Body POSTed to the merchant's callback URL when an order is paid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentCallback {
    pub order_id: String,
    /// System-assigned order id
    pub transaction_id: i64,
    /// Amount received, two fractional digits
    pub amount: String,
    pub pay_time: DateTime<Utc>,
    /// Provider type code
    pub payment_method: String,
    pub status: String,
}

impl PaymentCallback {
    pub fn paid(order: &PaymentOrder, pay_time: DateTime<Utc>) -> Self {
        Self {
            order_id: order.order_id.clone(),
            transaction_id: order.id,
            amount: format_amount(order.reserved_amount),
            pay_time,
            payment_method: order.provider.code().to_string(),
            status: "success".to_string(),
        }
    }
}
