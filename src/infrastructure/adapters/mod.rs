//! Infrastructure adapters module
//!
//! Implementations of the domain ports plus metrics and the upstream probe.

pub mod http_callback;
pub mod memory_store;
pub mod monitoring;
pub mod redis_store;
pub mod upstream_probe;

pub use http_callback::HttpCallbackSender;
pub use memory_store::{MemoryKeyValueStore, MemoryMerchantStore, MemoryOrderStore};
pub use monitoring::ReconciliationMetrics;
pub use redis_store::RedisKeyValueStore;
pub use upstream_probe::UpstreamProbe;
