//! Application layer - use cases and application services
//!
//! Services that reserve amounts, keep provider sessions alive and drive
//! monitor tasks, plus the engine facade the API layer calls.

pub mod engine;
pub mod services;
pub mod use_cases;

pub use engine::{EngineDeps, ReconciliationEngine, ReserveRequest};
pub use services::*;
pub use use_cases::*;
