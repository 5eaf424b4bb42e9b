//! Configuration management module
//!
//! Loading, validation and typed access to engine settings.

pub mod app_config;
pub mod validation;

pub use app_config::{
    AllocatorConfig, AppConfig, CallbackConfig, HealthConfig, LoggingConfig, MonitorConfig,
    RedisConfig, SessionConfig,
};
pub use validation::ConfigValidator;
