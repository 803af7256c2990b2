//! Redis counter store.
//!
//! The check-and-increment runs as a Lua script so the read, the
//! conditional increment, and the one-time EXPIRE happen in a single
//! server-side step. Concurrent first-increments for a new key cannot race
//! into two TTLs or a lost increment because Redis executes scripts
//! serially per key.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};
use std::collections::HashMap;
use std::time::Duration;

use crate::error::StoreError;
use crate::store::{CounterStore, WindowSample};

/// Redis-backed [`CounterStore`].
#[derive(Clone)]
pub struct RedisCounterStore {
    conn: ConnectionManager,
    check_script: Script,
}

impl RedisCounterStore {
    /// Connect to Redis with a bounded connect timeout.
    pub async fn new(url: &str, connect_timeout: Duration) -> Result<Self, StoreError> {
        let client = Client::open(url).map_err(|e| StoreError::Backend(e.to_string()))?;

        let conn = tokio::time::timeout(connect_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| StoreError::Timeout(connect_timeout))?
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        // Returns [allowed, count_before, ttl]. EXPIRE fires only when INCR
        // created the key; denied calls never INCR.
        let check_script = Script::new(
            r#"
            local key = KEYS[1]
            local limit = tonumber(ARGV[1])
            local window_secs = tonumber(ARGV[2])

            local current = tonumber(redis.call('GET', key) or '0')
            if current >= limit then
                local ttl = redis.call('TTL', key)
                if ttl < 0 then ttl = window_secs end
                return {0, current, ttl}
            end

            local after = redis.call('INCR', key)
            if after == 1 then
                redis.call('EXPIRE', key, window_secs)
            end
            local ttl = redis.call('TTL', key)
            if ttl < 0 then ttl = window_secs end
            return {1, after - 1, ttl}
            "#,
        );

        tracing::info!(url = %url, "connected to redis counter store");

        Ok(Self { conn, check_script })
    }
}

impl std::fmt::Debug for RedisCounterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCounterStore").finish_non_exhaustive()
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn check_and_incr(
        &self,
        key: &str,
        limit: u32,
        window_secs: u64,
    ) -> Result<WindowSample, StoreError> {
        let mut conn = self.conn.clone();
        let result: Vec<i64> = self
            .check_script
            .key(key)
            .arg(limit)
            .arg(window_secs)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let allowed = result.first().copied().unwrap_or(0) == 1;
        let count_before = result.get(1).copied().unwrap_or(0).max(0) as u64;
        let ttl_secs = result.get(2).copied().unwrap_or(0).max(0) as u64;

        Ok(WindowSample { allowed, count_before, ttl_secs })
    }

    async fn peek(&self, key: &str) -> Result<Option<(u64, u64)>, StoreError> {
        let mut conn = self.conn.clone();
        let (count, ttl): (Option<i64>, i64) = redis::pipe()
            .get(key)
            .ttl(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(count.map(|c| (c.max(0) as u64, ttl.max(0) as u64)))
    }

    async fn delete_prefixed(&self, prefix: &str) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}*", prefix);

        let keys: Vec<String> = {
            let mut iter = conn
                .scan_match::<_, String>(&pattern)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            let mut keys = Vec::new();
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
            keys
        };

        if keys.is_empty() {
            return Ok(0);
        }

        let removed: u64 = conn
            .del(&keys)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(removed)
    }

    async fn read_fields(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        let mut conn = self.conn.clone();
        conn.hgetall(key)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn write_fields(
        &self,
        key: &str,
        fields: &[(String, String)],
        ttl_secs: u64,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = redis::pipe()
            .atomic()
            .del(key)
            .ignore()
            .hset_multiple(key, fields)
            .ignore()
            .expire(key, ttl_secs as i64)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }
}
