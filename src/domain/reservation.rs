//! Amount reservation keys and candidate amounts
//!
//! A reservation is a key `<namespace>:<merchantId>:<amount>` created with
//! set-if-absent semantics. The amount is always rendered with exactly two
//! fractional digits so that `5.1` and `5.10` map to the same key.

use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::shared::error::{AppError, AppResult};

/// Largest cent offset; 100 would alias the next whole unit.
pub const MAX_DECIMAL: u32 = 99;

/// Inclusive range of cent offsets added to a base amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecimalRange {
    pub min: u32,
    pub max: u32,
}

impl DecimalRange {
    pub fn new(min: u32, max: u32) -> Self {
        Self { min, max }
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.min > self.max {
            return Err(AppError::Configuration(format!(
                "decimal range minimum {} exceeds maximum {}",
                self.min, self.max
            )));
        }
        if self.max > MAX_DECIMAL {
            return Err(AppError::Configuration(format!(
                "decimal range maximum {} exceeds {}",
                self.max, MAX_DECIMAL
            )));
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        if self.min > self.max {
            0
        } else {
            (self.max - self.min + 1) as usize
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Render an amount with exactly two fractional digits.
pub fn format_amount(amount: Decimal) -> String {
    let mut rounded = amount.round_dp(2);
    rounded.rescale(2);
    rounded.to_string()
}

/// Every `base + d/100` for `d` in the range, in ascending order.
pub fn candidate_amounts(base: Decimal, range: DecimalRange) -> Vec<Decimal> {
    (range.min..=range.max)
        .map(|cents| {
            let mut amount = (base + Decimal::new(i64::from(cents), 2)).round_dp(2);
            amount.rescale(2);
            amount
        })
        .collect()
}

/// Builds and parses reservation keys under one namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationKeys {
    namespace: String,
}

impl ReservationKeys {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    pub fn key(&self, merchant_id: i64, amount: Decimal) -> String {
        format!("{}:{}:{}", self.namespace, merchant_id, format_amount(amount))
    }

    /// Prefix matching every reservation of the merchant.
    pub fn merchant_prefix(&self, merchant_id: i64) -> String {
        format!("{}:{}:", self.namespace, merchant_id)
    }

    /// Extract the amount from a key of this namespace and merchant.
    pub fn parse_amount(&self, merchant_id: i64, key: &str) -> Option<Decimal> {
        let raw = key.strip_prefix(&self.merchant_prefix(merchant_id))?;
        Decimal::from_str(raw).ok()
    }
}

/// Session cache key: `<namespace>:<providerCode>:<merchantId>`.
pub fn session_key(namespace: &str, provider_code: &str, merchant_id: i64) -> String {
    format!("{}:{}:{}", namespace, provider_code, merchant_id)
}
