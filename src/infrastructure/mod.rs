//! Infrastructure layer - external concerns and adapters

pub mod adapters;

pub use adapters::{
    HttpCallbackSender, MemoryKeyValueStore, MemoryMerchantStore, MemoryOrderStore,
    ReconciliationMetrics, RedisKeyValueStore, UpstreamProbe,
};
