//! Provider portal models and order-list decoding
//!
//! Each portal returns its own JSON envelope. Decoding normalizes rows into
//! [`ProviderOrder`] so the matching rule is shared by every provider.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::shared::error::{AppError, AppResult};
use crate::shared::time::{parse_provider_time, within_window};

/// Supported merchant portals.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Xingyi,
    /// Registered but not implemented; its order lists decode empty.
    Rich,
    Xianxiang,
}

impl ProviderKind {
    /// Type code stored on merchant accounts and in session keys.
    pub fn code(&self) -> &'static str {
        match self {
            ProviderKind::Xingyi => "0",
            ProviderKind::Rich => "1",
            ProviderKind::Xianxiang => "2",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Xingyi => "xingyi",
            ProviderKind::Rich => "rich",
            ProviderKind::Xianxiang => "xianxiang",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "0" | "xingyi" => Ok(ProviderKind::Xingyi),
            "1" | "rich" => Ok(ProviderKind::Rich),
            "2" | "xianxiang" => Ok(ProviderKind::Xianxiang),
            _ => Err(format!("unsupported provider type: {}", s)),
        }
    }
}

/// Result of a successful portal login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginGrant {
    pub token: String,
    /// Lifetime reported by the portal, if any
    pub expires_in: Option<Duration>,
}

/// Authenticated portal session of one merchant.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderSession {
    pub merchant_id: i64,
    pub provider: ProviderKind,
    pub token: String,
    pub acquired_at: DateTime<Utc>,
    pub ttl_seconds: u64,
}

impl std::fmt::Debug for ProviderSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSession")
            .field("merchant_id", &self.merchant_id)
            .field("provider", &self.provider)
            .field("token", &"<redacted>")
            .field("acquired_at", &self.acquired_at)
            .field("ttl_seconds", &self.ttl_seconds)
            .finish()
    }
}

impl ProviderSession {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

/// One row of a portal order list, normalized.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderOrder {
    pub order_no: String,
    /// Amount actually received; `None` when the portal value is unparsable
    pub amount: Option<Decimal>,
    /// Order creation time as reported
    pub created_at_raw: String,
    /// Settlement time as reported, when the portal has one
    pub paid_at_raw: Option<String>,
    pub status: String,
    pub channel: String,
}

impl ProviderOrder {
    pub fn created_at(&self, offset: FixedOffset) -> Option<DateTime<Utc>> {
        parse_provider_time(&self.created_at_raw, offset)
    }

    /// Settlement time, falling back to the creation time.
    pub fn pay_time(&self, offset: FixedOffset) -> Option<DateTime<Utc>> {
        self.paid_at_raw
            .as_deref()
            .and_then(|raw| parse_provider_time(raw, offset))
            .or_else(|| self.created_at(offset))
    }
}

#[derive(Debug, Deserialize)]
struct XingyiEnvelope {
    #[serde(rename = "RSPCOD", default)]
    rspcod: String,
    #[serde(rename = "RSPMSG", default)]
    rspmsg: String,
    #[serde(rename = "ROWLIST", default)]
    rowlist: Vec<XingyiRow>,
}

#[derive(Debug, Deserialize)]
struct XingyiRow {
    #[serde(rename = "ORDER_TIME", default)]
    order_time: String,
    #[serde(rename = "REC_TXAMT", default)]
    rec_txamt: String,
    #[serde(rename = "ORDER_NO", default)]
    order_no: String,
    #[serde(rename = "ORDER_STATUS", default)]
    order_status: String,
    #[serde(rename = "PAY_CHANNEL", default)]
    pay_channel: String,
}

#[derive(Debug, Deserialize)]
struct XianxiangEnvelope {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    data: XianxiangPage,
}

#[derive(Debug, Default, Deserialize)]
struct XianxiangPage {
    #[serde(default)]
    data: Vec<XianxiangRow>,
}

#[derive(Debug, Deserialize)]
struct XianxiangRow {
    #[serde(default)]
    order_sn: String,
    #[serde(default)]
    real_price: Value,
    #[serde(default)]
    status: Value,
    #[serde(default)]
    pay_way: String,
    #[serde(default)]
    create_at: String,
    #[serde(default)]
    pay_time: Option<String>,
}

fn decimal_from_value(value: &Value) -> Option<Decimal> {
    match value {
        Value::String(s) => Decimal::from_str(s.trim()).ok(),
        Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        _ => None,
    }
}

fn value_to_label(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Decode a raw order-list body into normalized rows.
pub fn decode_orders(kind: ProviderKind, raw: &str) -> AppResult<Vec<ProviderOrder>> {
    match kind {
        ProviderKind::Xingyi => decode_xingyi(raw),
        ProviderKind::Xianxiang => decode_xianxiang(raw),
        ProviderKind::Rich => {
            debug!(provider = %kind, "Order decoding not supported for provider");
            Ok(Vec::new())
        }
    }
}

fn decode_xingyi(raw: &str) -> AppResult<Vec<ProviderOrder>> {
    let body: Value = serde_json::from_str(raw)
        .map_err(|e| AppError::ProviderIo(format!("xingyi order list is not JSON: {}", e)))?;

    // An expired session answers with a page lacking ROWLIST entirely.
    if body.get("ROWLIST").is_none() {
        warn!("xingyi order list has no ROWLIST field");
        return Ok(Vec::new());
    }

    let envelope: XingyiEnvelope = serde_json::from_value(body)
        .map_err(|e| AppError::ProviderIo(format!("malformed xingyi order list: {}", e)))?;

    if envelope.rspcod != "00000" {
        return Err(AppError::ProviderIo(format!(
            "xingyi query failed ({}): {}",
            envelope.rspcod, envelope.rspmsg
        )));
    }

    Ok(envelope
        .rowlist
        .into_iter()
        .map(|row| ProviderOrder {
            order_no: row.order_no,
            amount: Decimal::from_str(row.rec_txamt.trim()).ok(),
            created_at_raw: row.order_time,
            paid_at_raw: None,
            status: row.order_status,
            channel: row.pay_channel,
        })
        .collect())
}

fn decode_xianxiang(raw: &str) -> AppResult<Vec<ProviderOrder>> {
    let envelope: XianxiangEnvelope = serde_json::from_str(raw)
        .map_err(|e| AppError::ProviderIo(format!("malformed xianxiang order list: {}", e)))?;

    if envelope.code != 200 {
        return Err(AppError::ProviderIo(format!(
            "xianxiang query failed ({}): {}",
            envelope.code, envelope.msg
        )));
    }

    Ok(envelope
        .data
        .data
        .into_iter()
        .map(|row| ProviderOrder {
            order_no: row.order_sn,
            amount: decimal_from_value(&row.real_price),
            created_at_raw: row.create_at,
            paid_at_raw: row.pay_time.filter(|t| !t.trim().is_empty()),
            status: value_to_label(&row.status),
            channel: row.pay_way,
        })
        .collect())
}

/// First row whose amount equals `amount` and whose creation time lies in
/// `[start, end]`. Rows with unparsable times never match.
pub fn find_match<'a>(
    orders: &'a [ProviderOrder],
    amount: Decimal,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    offset: FixedOffset,
) -> Option<&'a ProviderOrder> {
    orders.iter().find(|order| {
        if order.amount != Some(amount) {
            return false;
        }
        match order.created_at(offset) {
            Some(at) => within_window(at, start, end),
            None => {
                debug!(order_no = %order.order_no, raw = %order.created_at_raw, "Unparsable provider time");
                false
            }
        }
    })
}
