//! Application configuration structures
//!
//! Typed sections loaded from `Reconciler.toml` and `SCANPAY__*` environment
//! variables.

use std::time::Duration;

use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::config::validation::ConfigValidator;
use crate::domain::reservation::DecimalRange;
use crate::shared::error::{AppError, AppResult};
use crate::shared::retry::LinearBackoff;
use crate::shared::time::provider_offset;

/// Key-value store configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct RedisConfig {
    /// Redis connection URL
    #[validate(length(min = 1))]
    pub url: String,

    /// Prefix of amount reservation keys
    #[validate(length(min = 1))]
    pub namespace_reservation: String,

    /// Prefix of cached provider session keys
    #[validate(length(min = 1))]
    pub namespace_session: String,

    /// COUNT hint for SCAN iterations
    #[validate(range(min = 1, max = 10000))]
    pub scan_batch: u32,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            namespace_reservation: "pay_amount_used".to_string(),
            namespace_session: "pay_request_token".to_string(),
            scan_batch: 100,
        }
    }
}

/// Amount allocator configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct AllocatorConfig {
    /// Smallest cent offset tried when the merchant has no bound
    #[validate(range(min = 0, max = 99))]
    pub default_min_decimal: u32,

    /// Largest cent offset tried when the merchant has no bound
    #[validate(range(min = 0, max = 99))]
    pub default_max_decimal: u32,

    /// Reservation lifetime used when a request carries no ttl (seconds)
    #[validate(range(min = 1, max = 86400))]
    pub default_ttl_seconds: u64,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            default_min_decimal: 1,
            default_max_decimal: 99,
            default_ttl_seconds: 300,
        }
    }
}

impl AllocatorConfig {
    pub fn default_range(&self) -> DecimalRange {
        DecimalRange::new(self.default_min_decimal, self.default_max_decimal)
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_seconds)
    }
}

/// Monitor task configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct MonitorConfig {
    /// Per-order poll interval (seconds)
    #[validate(range(min = 1, max = 3600))]
    pub poll_interval_seconds: u64,

    /// Merchant sweep interval (seconds)
    #[validate(range(min = 1, max = 3600))]
    pub sweep_interval_seconds: u64,

    /// Upper bound on a single provider order query (seconds)
    #[validate(range(min = 1, max = 300))]
    pub provider_timeout_seconds: u64,

    /// Query window for orders without an expiry (seconds)
    #[validate(range(min = 1, max = 86400))]
    pub default_window_seconds: u64,

    /// Offset of provider wall-clock timestamps, minutes east of UTC
    #[validate(range(min = -1439, max = 1439))]
    pub provider_utc_offset_minutes: i32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: 10,
            sweep_interval_seconds: 30,
            provider_timeout_seconds: 15,
            default_window_seconds: 300,
            provider_utc_offset_minutes: 480,
        }
    }
}

impl MonitorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_seconds)
    }

    pub fn provider_offset(&self) -> AppResult<FixedOffset> {
        provider_offset(self.provider_utc_offset_minutes)
    }
}

/// Provider session configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SessionConfig {
    /// Login attempts per acquisition
    #[validate(range(min = 1, max = 20))]
    pub max_attempts: u32,

    /// Linear backoff step between attempts (milliseconds)
    #[validate(range(min = 0, max = 60000))]
    pub backoff_base_millis: u64,

    /// Cache lifetime when the provider reports none (seconds)
    #[validate(range(min = 1, max = 86400))]
    pub default_ttl_seconds: u64,

    /// Bound on a single login call (seconds)
    #[validate(range(min = 1, max = 300))]
    pub login_timeout_seconds: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_base_millis: 1000,
            default_ttl_seconds: 3600,
            login_timeout_seconds: 20,
        }
    }
}

impl SessionConfig {
    pub fn backoff(&self) -> LinearBackoff {
        LinearBackoff::new(Duration::from_millis(self.backoff_base_millis), self.max_attempts)
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_seconds)
    }

    pub fn login_timeout(&self) -> Duration {
        Duration::from_secs(self.login_timeout_seconds)
    }
}

/// Merchant callback configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct CallbackConfig {
    /// Request timeout (seconds)
    #[validate(range(min = 1, max = 120))]
    pub timeout_seconds: u64,

    /// User-Agent header sent with every callback
    #[validate(length(min = 1))]
    pub user_agent: String,
}

impl Default for CallbackConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 10,
            user_agent: "Four-Pay-System/1.0".to_string(),
        }
    }
}

/// Upstream probe configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct HealthConfig {
    /// Run the TCP probe
    pub enabled: bool,

    /// `host:port` the probe connects to
    pub probe_address: String,

    #[validate(range(min = 1, max = 3600))]
    pub probe_interval_seconds: u64,

    /// Consecutive failures before the upstream counts as unhealthy
    #[validate(range(min = 1, max = 100))]
    pub max_failures: u32,

    #[validate(range(min = 1, max = 60))]
    pub probe_timeout_seconds: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            probe_address: String::new(),
            probe_interval_seconds: 30,
            max_failures: 3,
            probe_timeout_seconds: 3,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    #[validate(length(min = 1))]
    pub level: String,

    /// Log format: "json" or "text"
    #[validate(length(min = 1))]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub redis: RedisConfig,
    pub allocator: AllocatorConfig,
    pub monitor: MonitorConfig,
    pub session: SessionConfig,
    pub callback: CallbackConfig,
    pub health: HealthConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from `Reconciler.toml` and environment variables
    pub fn load() -> AppResult<Self> {
        Self::load_from("Reconciler")
    }

    /// Load configuration from the named file (extension optional) and
    /// environment variables. Missing files are allowed.
    pub fn load_from(file: &str) -> AppResult<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(file).required(false))
            .add_source(config::Environment::with_prefix("SCANPAY").separator("__"))
            .build()
            .map_err(|e| AppError::Configuration(format!("Failed to build configuration: {}", e)))?;

        let config: AppConfig = config.try_deserialize().map_err(|e| {
            AppError::Configuration(format!("Failed to deserialize configuration: {}", e))
        })?;

        config.validate_config()?;
        Ok(config)
    }

    /// Field-level and cross-field validation
    pub fn validate_config(&self) -> AppResult<()> {
        self.redis.validate()?;
        self.allocator.validate()?;
        self.monitor.validate()?;
        self.session.validate()?;
        self.callback.validate()?;
        self.health.validate()?;
        self.logging.validate()?;

        ConfigValidator::validate_config(self)
    }
}
