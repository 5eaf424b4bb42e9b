//! Domain layer - core models and collaborator interfaces
//!
//! Orders, merchant accounts, provider payloads and reservation keys,
//! independent of Redis, HTTP or the scheduler.

pub mod callback;
pub mod health;
pub mod merchants;
pub mod orders;
pub mod ports;
pub mod provider;
pub mod reservation;

pub use callback::PaymentCallback;
pub use health::{HealthResponse, HealthStatus, ProbeReport};
pub use merchants::MerchantAccount;
pub use orders::{
    CancelOutcome, NewPaymentOrder, OrderHandle, OrderState, OrderStateView, OrderUpdate,
    PaymentOrder, Principal,
};
pub use ports::{
    CallbackSender, KeyValueStore, MerchantAccountStore, OrderStore, ProviderGateway,
    ProviderGateways,
};
pub use provider::{LoginGrant, ProviderKind, ProviderOrder, ProviderSession};
pub use reservation::{DecimalRange, ReservationKeys};
