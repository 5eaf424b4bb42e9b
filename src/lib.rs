//! Scan-to-pay reconciliation engine
//!
//! Reserves collision-free payable amounts per merchant, polls the
//! merchant's provider portal for matching transfers and drives each
//! order from pending to paid, failed or canceled.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod shared;


pub use application::{EngineDeps, ReconciliationEngine, ReserveRequest};
pub use config::AppConfig;
pub use shared::error::{AppError, AppResult};
