//! Use cases - application operations composed from services

pub mod health_check;

pub use health_check::HealthCheckUseCase;
