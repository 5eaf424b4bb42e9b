//! Shared utilities and common functionality
//!
//! Error handling, logging, backoff and provider time helpers used across
//! the engine.

pub mod error;
pub mod logging;
pub mod retry;
pub mod time;

pub use error::{AppError, AppResult};
pub use logging::LoggingUtils;
pub use retry::{retry_with_backoff, LinearBackoff};
