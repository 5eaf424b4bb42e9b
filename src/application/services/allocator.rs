//! Amount allocator
//!
//! Picks a collision-free display amount `base + d/100` for a merchant by
//! racing set-if-absent on reservation keys. Candidates are tried in random
//! order so concurrent requests for the same base rarely contend on the
//! same key.

use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::domain::ports::KeyValueStore;
use crate::domain::reservation::{candidate_amounts, DecimalRange, ReservationKeys};
use crate::infrastructure::adapters::monitoring::ReconciliationMetrics;
use crate::shared::error::{AppError, AppResult};

pub struct AmountAllocator {
    kv: Arc<dyn KeyValueStore>,
    keys: ReservationKeys,
    metrics: Arc<ReconciliationMetrics>,
}

impl AmountAllocator {
    pub fn new(
        kv: Arc<dyn KeyValueStore>,
        namespace: impl Into<String>,
        metrics: Arc<ReconciliationMetrics>,
    ) -> Self {
        Self {
            kv,
            keys: ReservationKeys::new(namespace),
            metrics,
        }
    }

    pub fn keys(&self) -> &ReservationKeys {
        &self.keys
    }

    /// Reserve one amount in `[base + min/100, base + max/100]` for `ttl`.
    ///
    /// `holder` is stored as the reservation value. Returns `Ok(None)` when
    /// every candidate is taken. Store errors are returned as-is; a failed
    /// store never yields an amount.
    pub async fn reserve(
        &self,
        merchant_id: i64,
        base: Decimal,
        range: DecimalRange,
        ttl: Duration,
        holder: &str,
    ) -> AppResult<Option<Decimal>> {
        range.validate()?;
        if ttl.is_zero() {
            return Err(AppError::Configuration("reservation ttl must be positive".to_string()));
        }

        let mut candidates = candidate_amounts(base, range);
        candidates.shuffle(&mut rand::rng());

        for amount in candidates {
            let key = self.keys.key(merchant_id, amount);
            if self.kv.create_if_absent(&key, holder, ttl).await? {
                info!(
                    merchant_id,
                    base = %base,
                    amount = %amount,
                    ttl_secs = ttl.as_secs(),
                    "Amount reserved"
                );
                self.metrics.record_reservation("made");
                return Ok(Some(amount));
            }
            debug!(merchant_id, amount = %amount, "Amount already reserved");
        }

        warn!(
            merchant_id,
            base = %base,
            min = range.min,
            max = range.max,
            "No free amount in range"
        );
        self.metrics.record_reservation("exhausted");
        Ok(None)
    }

    /// Delete a reservation while `holder` still owns it. A lease that
    /// lapsed and was taken by another order is left alone. Returns whether
    /// a key was removed.
    pub async fn release(&self, merchant_id: i64, amount: Decimal, holder: &str) -> AppResult<bool> {
        let key = self.keys.key(merchant_id, amount);
        let removed = self.kv.delete_if_value(&key, holder).await?;
        if removed {
            debug!(merchant_id, amount = %amount, holder, "Reservation released");
            self.metrics.record_reservation("released");
        } else {
            debug!(merchant_id, amount = %amount, holder, "Reservation not held by order, left in place");
        }
        Ok(removed)
    }

    /// Live reservations of a merchant as `(key, amount)` pairs.
    pub async fn reservations(&self, merchant_id: i64) -> AppResult<Vec<(String, Decimal)>> {
        let keys = self.kv.scan_prefix(&self.keys.merchant_prefix(merchant_id)).await?;
        Ok(keys
            .into_iter()
            .filter_map(|key| {
                let amount = self.keys.parse_amount(merchant_id, &key)?;
                Some((key, amount))
            })
            .collect())
    }

    /// Order id stored with a reservation key.
    pub async fn holder(&self, key: &str) -> AppResult<Option<String>> {
        self.kv.get(key).await
    }
}
