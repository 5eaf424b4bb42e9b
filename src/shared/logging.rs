//! Logging utilities module
//!
//! Installs the global tracing subscriber and hosts a few structured log
//! helpers shared by the monitor tasks.

use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::config::LoggingConfig;
use crate::shared::error::{AppError, AppResult};

/// Logging utilities for the application
pub struct LoggingUtils;

impl LoggingUtils {
    /// Initialize logging with the specified configuration.
    ///
    /// `RUST_LOG` overrides the configured level when set.
    pub fn initialize(config: &LoggingConfig) -> AppResult<()> {
        use tracing_subscriber::{fmt, EnvFilter};

        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

        let result = if config.format.eq_ignore_ascii_case("json") {
            let subscriber = fmt::Subscriber::builder()
                .with_env_filter(filter)
                .with_target(false)
                .with_thread_names(true)
                .with_ansi(false)
                .json()
                .finish();
            tracing::subscriber::set_global_default(subscriber)
        } else {
            let subscriber = fmt::Subscriber::builder()
                .with_env_filter(filter)
                .with_target(false)
                .with_thread_names(true)
                .with_file(true)
                .with_line_number(true)
                .with_ansi(false)
                .compact()
                .finish();
            tracing::subscriber::set_global_default(subscriber)
        };

        result.map_err(|e| AppError::Internal(format!("Failed to initialize logging: {}", e)))
    }

    /// Log a monitor task leaving the registry.
    pub fn log_task_stopped(task_id: &str, key: &str, elapsed: Duration) {
        info!(
            task_id = %task_id,
            key = %key,
            elapsed_ms = %elapsed.as_millis(),
            "Monitor task stopped"
        );
    }

    /// Log a failed poll tick at a level matching how the failure is
    /// handled. Recoverable failures are retried on the next interval.
    pub fn log_tick_failure(task_id: &str, stage: &str, err: &AppError) {
        if err.is_benign() {
            debug!(task_id = %task_id, stage = %stage, kind = err.kind(), error = %err, "Poll tick skipped");
        } else if err.is_recoverable() {
            warn!(
                task_id = %task_id,
                stage = %stage,
                kind = err.kind(),
                error = %err,
                "Poll tick failed, will retry on next tick"
            );
        } else {
            error!(
                task_id = %task_id,
                stage = %stage,
                kind = err.kind(),
                error = %err,
                "Poll tick failed and needs attention"
            );
        }
    }
}
