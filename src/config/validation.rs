//! Configuration validation module
//!
//! Cross-field checks the validator derive cannot express.

use crate::config::app_config::{AllocatorConfig, AppConfig, HealthConfig, RedisConfig};
use crate::shared::error::{AppError, AppResult};

/// Configuration validator for additional validation logic
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the complete configuration
    pub fn validate_config(config: &AppConfig) -> AppResult<()> {
        Self::validate_namespaces(&config.redis)?;
        Self::validate_decimal_range(&config.allocator)?;
        Self::validate_health(&config.health)?;
        config.monitor.provider_offset()?;

        if config.monitor.provider_timeout_seconds > config.monitor.poll_interval_seconds * 3 {
            tracing::warn!(
                provider_timeout = config.monitor.provider_timeout_seconds,
                poll_interval = config.monitor.poll_interval_seconds,
                "Provider timeout is much longer than the poll interval; ticks may queue up"
            );
        }

        Ok(())
    }

    /// Namespaces become key prefixes split on ':'.
    fn validate_namespaces(redis: &RedisConfig) -> AppResult<()> {
        for (name, value) in [
            ("namespace_reservation", &redis.namespace_reservation),
            ("namespace_session", &redis.namespace_session),
        ] {
            if value.trim().is_empty() {
                return Err(AppError::Configuration(format!("redis.{} must not be empty", name)));
            }
            if value.contains(':') || value.contains('*') {
                return Err(AppError::Configuration(format!(
                    "redis.{} must not contain ':' or '*'",
                    name
                )));
            }
        }

        if redis.namespace_reservation == redis.namespace_session {
            return Err(AppError::Configuration(
                "reservation and session namespaces must differ".to_string(),
            ));
        }

        Ok(())
    }

    fn validate_decimal_range(allocator: &AllocatorConfig) -> AppResult<()> {
        allocator.default_range().validate()
    }

    fn validate_health(health: &HealthConfig) -> AppResult<()> {
        if health.enabled && health.probe_address.trim().is_empty() {
            return Err(AppError::Configuration(
                "health.probe_address is required when the probe is enabled".to_string(),
            ));
        }
        Ok(())
    }
}
