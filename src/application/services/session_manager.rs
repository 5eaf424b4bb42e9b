//! Provider session acquisition
//!
//! Sessions are cached in the key-value store per provider and merchant.
//! A cached session is revalidated with the portal before use; otherwise
//! the manager logs in with bounded linear backoff.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::domain::merchants::MerchantAccount;
use crate::domain::ports::{KeyValueStore, ProviderGateway, ProviderGateways};
use crate::domain::provider::ProviderSession;
use crate::domain::reservation::session_key;
use crate::infrastructure::adapters::monitoring::ReconciliationMetrics;
use crate::shared::error::{AppError, AppResult};
use crate::shared::retry::retry_with_backoff;

pub struct SessionManager {
    kv: Arc<dyn KeyValueStore>,
    gateways: ProviderGateways,
    namespace: String,
    config: SessionConfig,
    metrics: Arc<ReconciliationMetrics>,
}

impl SessionManager {
    pub fn new(
        kv: Arc<dyn KeyValueStore>,
        gateways: ProviderGateways,
        namespace: impl Into<String>,
        config: SessionConfig,
        metrics: Arc<ReconciliationMetrics>,
    ) -> Self {
        Self {
            kv,
            gateways,
            namespace: namespace.into(),
            config,
            metrics,
        }
    }

    fn key(&self, account: &MerchantAccount) -> String {
        session_key(&self.namespace, account.provider.code(), account.merchant_id)
    }

    /// Return a session the portal currently accepts, logging in if needed.
    pub async fn get_valid_session(&self, account: &MerchantAccount) -> AppResult<ProviderSession> {
        let gateway = self.gateways.get(account.provider)?;
        let key = self.key(account);

        if let Some(session) = self.cached(&key).await {
            let check_timeout = self.config.login_timeout();
            match tokio::time::timeout(check_timeout, gateway.check_session(&session)).await {
                Ok(true) => {
                    debug!(merchant_id = account.merchant_id, provider = %account.provider, "Reusing cached session");
                    return Ok(session);
                }
                Ok(false) => {
                    info!(merchant_id = account.merchant_id, provider = %account.provider, "Cached session rejected by portal");
                }
                Err(_) => {
                    warn!(
                        merchant_id = account.merchant_id,
                        provider = %account.provider,
                        timeout_secs = check_timeout.as_secs(),
                        "Session check timed out, logging in"
                    );
                }
            }
        }

        self.login(account, gateway.as_ref(), &key).await
    }

    /// Drop the cached session so the next request logs in again.
    pub async fn invalidate(&self, account: &MerchantAccount) -> AppResult<()> {
        self.kv.delete(&self.key(account)).await?;
        Ok(())
    }

    async fn cached(&self, key: &str) -> Option<ProviderSession> {
        let raw = match self.kv.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, "Session cache read failed, logging in");
                return None;
            }
        };

        match serde_json::from_str::<ProviderSession>(&raw) {
            Ok(session) => Some(session),
            Err(e) => {
                warn!(error = %e, "Discarding unreadable cached session");
                None
            }
        }
    }

    async fn login(
        &self,
        account: &MerchantAccount,
        gateway: &dyn ProviderGateway,
        key: &str,
    ) -> AppResult<ProviderSession> {
        let provider = account.provider.as_str();
        let login_timeout = self.config.login_timeout();

        let result = retry_with_backoff(
            self.config.backoff(),
            login_timeout,
            "provider_login",
            || AppError::ProviderIo(format!("login timed out after {}s", login_timeout.as_secs())),
            |attempt| {
                debug!(merchant_id = account.merchant_id, provider = %provider, attempt, "Logging in to portal");
                gateway.login(&account.username, &account.password)
            },
        )
        .await;

        let grant = match result {
            Ok(grant) => {
                self.metrics.record_login(provider, "success");
                grant
            }
            Err(exhausted) => {
                self.metrics.record_login(provider, "exhausted");
                warn!(
                    merchant_id = account.merchant_id,
                    provider = %provider,
                    attempts = exhausted.attempts,
                    "Portal login retries exhausted"
                );
                return Err(AppError::SessionAcquisitionFailed {
                    merchant_id: account.merchant_id,
                    attempts: exhausted.attempts,
                    last_error: exhausted.last_error.to_string(),
                });
            }
        };

        let ttl = grant
            .expires_in
            .filter(|ttl| !ttl.is_zero())
            .unwrap_or_else(|| self.config.default_ttl());

        let session = ProviderSession {
            merchant_id: account.merchant_id,
            provider: account.provider,
            token: grant.token,
            acquired_at: Utc::now(),
            ttl_seconds: ttl.as_secs().max(1),
        };

        self.store(key, &session, ttl).await;
        info!(merchant_id = account.merchant_id, provider = %provider, ttl_secs = ttl.as_secs(), "Portal session acquired");
        Ok(session)
    }

    /// Cache write failures only cost an extra login later.
    async fn store(&self, key: &str, session: &ProviderSession, ttl: Duration) {
        let serialized = match serde_json::to_string(session) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "Could not serialize session for cache");
                return;
            }
        };
        if let Err(e) = self.kv.set(key, &serialized, ttl).await {
            warn!(error = %e, "Session cache write failed");
        }
    }
}
