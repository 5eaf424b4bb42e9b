//! Merchant accounts on the provider portals

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::provider::ProviderKind;
use crate::domain::reservation::DecimalRange;
use crate::shared::error::{AppError, AppResult};

/// Portal credentials and amount bounds of one merchant.
#[derive(Clone, Serialize, Deserialize)]
pub struct MerchantAccount {
    pub merchant_id: i64,
    pub provider: ProviderKind,
    pub username: String,
    pub password: String,
    /// Smallest accepted requested amount
    pub min_amount: Option<Decimal>,
    /// Largest accepted requested amount
    pub max_amount: Option<Decimal>,
    /// Cent offset bounds for the allocator
    pub min_decimal: Option<u32>,
    pub max_decimal: Option<u32>,
}

impl std::fmt::Debug for MerchantAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MerchantAccount")
            .field("merchant_id", &self.merchant_id)
            .field("provider", &self.provider)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("min_amount", &self.min_amount)
            .field("max_amount", &self.max_amount)
            .field("min_decimal", &self.min_decimal)
            .field("max_decimal", &self.max_decimal)
            .finish()
    }
}

impl MerchantAccount {
    pub fn new(
        merchant_id: i64,
        provider: ProviderKind,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            merchant_id,
            provider,
            username: username.into(),
            password: password.into(),
            min_amount: None,
            max_amount: None,
            min_decimal: None,
            max_decimal: None,
        }
    }

    /// Reject requested amounts outside the account's bounds.
    pub fn check_amount(&self, amount: Decimal) -> AppResult<()> {
        if amount <= Decimal::ZERO {
            return Err(AppError::Validation(format!(
                "requested amount {} must be positive",
                amount
            )));
        }
        if let Some(min) = self.min_amount {
            if amount < min {
                return Err(AppError::Validation(format!(
                    "requested amount {} is below the merchant minimum {}",
                    amount, min
                )));
            }
        }
        if let Some(max) = self.max_amount {
            if amount > max {
                return Err(AppError::Validation(format!(
                    "requested amount {} is above the merchant maximum {}",
                    amount, max
                )));
            }
        }
        Ok(())
    }

    /// Decimal range for this account, each missing bound taken from `default`.
    pub fn decimal_range(&self, default: DecimalRange) -> DecimalRange {
        DecimalRange::new(
            self.min_decimal.unwrap_or(default.min),
            self.max_decimal.unwrap_or(default.max),
        )
    }
}
