//! Redis-backed counter store.
//!
//! Counters live under their key with a millisecond TTL. INCR, PEXPIRE and PTTL run inside one
//! Lua script, so a key can never be left without an expiry.

use super::types::{RateLimitError, WindowCount};
use super::CounterStore;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;
use std::time::Duration;

const INCR_WITH_EXPIRY: &str = r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
local ttl = redis.call('PTTL', KEYS[1])
if ttl < 0 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
    ttl = tonumber(ARGV[1])
end
return {count, ttl}
"#;

pub struct RedisCounterStore {
    connection: ConnectionManager,
    script: Script,
}

impl RedisCounterStore {
    pub async fn connect(url: &str) -> Result<Self, RateLimitError> {
        let client = redis::Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;
        tracing::info!("Connected to redis counter store");
        Ok(Self {
            connection,
            script: Script::new(INCR_WITH_EXPIRY),
        })
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn incr_with_expiry(
        &self,
        key: &str,
        window: Duration,
    ) -> Result<WindowCount, RateLimitError> {
        let mut connection = self.connection.clone();
        let window_ms = window.as_millis().max(1) as u64;

        let (count, ttl_ms) = self
            .script
            .key(key)
            .arg(window_ms)
            .invoke_async::<_, (u64, i64)>(&mut connection)
            .await?;

        Ok(WindowCount {
            count,
            expires_in: Duration::from_millis(ttl_ms.max(0) as u64),
        })
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}

impl From<redis::RedisError> for RateLimitError {
    fn from(err: redis::RedisError) -> Self {
        RateLimitError::Backend(err.to_string())
    }
}
