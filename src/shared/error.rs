//! Error handling module
//!
//! Centralized error type for the reconciliation engine. Every fallible
//! operation returns [`AppResult`].

use thiserror::Error;

use crate::domain::orders::OrderState;

/// Application error types
#[derive(Error, Debug, Clone)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("No free amount for merchant {merchant_id} near base {base}")]
    AllocationExhausted { merchant_id: i64, base: String },

    #[error("Could not acquire provider session for merchant {merchant_id} after {attempts} attempts: {last_error}")]
    SessionAcquisitionFailed {
        merchant_id: i64,
        attempts: u32,
        last_error: String,
    },

    #[error("Provider I/O error: {0}")]
    ProviderIo(String),

    #[error("Callback delivery failed: {0}")]
    CallbackDeliveryFailed(String),

    #[error("Order {order_id} is already {state}")]
    AlreadyTerminal { order_id: String, state: OrderState },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Key-value store error: {0}")]
    Store(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Errors that a later poll tick may clear on its own.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AppError::SessionAcquisitionFailed { .. }
                | AppError::ProviderIo(_)
                | AppError::Store(_)
                | AppError::CallbackDeliveryFailed(_)
        )
    }

    /// Outcomes that callers usually treat as a no-op rather than a failure.
    pub fn is_benign(&self) -> bool {
        matches!(self, AppError::AlreadyTerminal { .. })
    }

    /// Short stable label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Configuration(_) => "configuration",
            AppError::AllocationExhausted { .. } => "allocation_exhausted",
            AppError::SessionAcquisitionFailed { .. } => "session_failed",
            AppError::ProviderIo(_) => "provider_io",
            AppError::CallbackDeliveryFailed(_) => "callback_failed",
            AppError::AlreadyTerminal { .. } => "already_terminal",
            AppError::NotFound(_) => "not_found",
            AppError::Forbidden(_) => "forbidden",
            AppError::Validation(_) => "validation",
            AppError::Store(_) => "store",
            AppError::Serialization(_) => "serialization",
            AppError::Internal(_) => "internal",
        }
    }
}

/// Application result type
pub type AppResult<T> = Result<T, AppError>;

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Configuration(err.to_string())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::Configuration(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<redis::RedisError> for AppError {
    fn from(err: redis::RedisError) -> Self {
        AppError::Store(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::ProviderIo(err.to_string())
    }
}

impl From<prometheus::Error> for AppError {
    fn from(err: prometheus::Error) -> Self {
        AppError::Internal(format!("metrics: {}", err))
    }
}
