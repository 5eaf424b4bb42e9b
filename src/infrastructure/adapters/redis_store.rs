//! Redis key-value adapter
//!
//! Backs amount reservations and the provider session cache. Reservations
//! rely on `SET key value NX PX ttl`, which is a single atomic command.
//! Releases go through a compare-and-delete script so a lapsed holder
//! cannot remove a lease that another order has since taken.

use std::time::Duration;

use async_trait::async_trait;
use redis::{aio::ConnectionManager, Client};
use tracing::{debug, info};

use crate::config::RedisConfig;
use crate::domain::ports::KeyValueStore;
use crate::shared::error::{AppError, AppResult};

const DELETE_IF_VALUE: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

/// Redis implementation of [`KeyValueStore`]
#[derive(Clone)]
pub struct RedisKeyValueStore {
    manager: ConnectionManager,
    scan_batch: u32,
}

impl RedisKeyValueStore {
    /// Connect and verify the server answers PING.
    pub async fn connect(config: &RedisConfig) -> AppResult<Self> {
        let client = Client::open(config.url.as_str())
            .map_err(|e| AppError::Configuration(format!("Invalid Redis URL: {}", e)))?;

        let manager = ConnectionManager::new(client)
            .await
            .map_err(|e| AppError::Store(format!("Failed to create Redis connection manager: {}", e)))?;

        let store = Self {
            manager,
            scan_batch: config.scan_batch,
        };
        store.ping().await?;
        info!("Redis connection established");
        Ok(store)
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    // PX 0 is rejected by Redis
    (ttl.as_millis() as u64).max(1)
}

#[async_trait]
impl KeyValueStore for RedisKeyValueStore {
    async fn create_if_absent(&self, key: &str, value: &str, ttl: Duration) -> AppResult<bool> {
        let mut conn = self.manager.clone();

        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await?;

        Ok(reply.is_some())
    }

    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        let mut conn = self.manager.clone();
        let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> AppResult<()> {
        let mut conn = self.manager.clone();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> AppResult<bool> {
        let mut conn = self.manager.clone();
        let removed: i64 = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        Ok(removed > 0)
    }

    async fn delete_if_value(&self, key: &str, expected: &str) -> AppResult<bool> {
        let mut conn = self.manager.clone();
        let removed: i64 = redis::cmd("EVAL")
            .arg(DELETE_IF_VALUE)
            .arg(1)
            .arg(key)
            .arg(expected)
            .query_async(&mut conn)
            .await?;
        Ok(removed > 0)
    }

    async fn scan_prefix(&self, prefix: &str) -> AppResult<Vec<String>> {
        let mut conn = self.manager.clone();
        let pattern = format!("{}*", prefix);
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(self.scan_batch)
                .query_async(&mut conn)
                .await?;

            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        // SCAN may return a key more than once
        keys.sort();
        keys.dedup();
        debug!(prefix = %prefix, count = keys.len(), "Scanned keys");
        Ok(keys)
    }

    async fn ping(&self) -> AppResult<()> {
        let mut conn = self.manager.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}
