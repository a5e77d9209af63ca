//! Redis implementation of the Neighborly [`CacheStore`].
//!
//! # Atomicity
//!
//! Two operations need more than one command to run without interleaving
//! and are executed as Lua scripts on the server:
//!
//! - [`CacheStore::reserve`]: membership check, stock check, decrement and
//!   membership insert
//! - [`CacheStore::hash_incr_existing`]: existence check and increment
//!
//! Scripts are loaded once per process and invoked by SHA, falling back to
//! `EVAL` when the server has not seen them yet.
//!
//! # Example
//!
//! ```no_run
//! use neighborly_redis::RedisCacheStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let cache = RedisCacheStore::new("redis://127.0.0.1:6379").await?;
//! # Ok(())
//! # }
//! ```

use neighborly_core::cache::CacheStore;
use neighborly_core::error::{CacheError, CacheResult};
use neighborly_core::model::ReserveOutcome;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};
use std::collections::HashMap;
use std::sync::LazyLock;
use std::time::Duration;

/// Keys fetched per `SCAN` round trip.
const SCAN_BATCH: usize = 500;

/// Reply codes: 1 reserved, 0 already reserved, -1 out of stock.
static RESERVE_SCRIPT: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
        if redis.call('SISMEMBER', KEYS[1], ARGV[1]) == 1 then
            return 0
        end
        local remain = tonumber(redis.call('HGET', KEYS[2], 'remain'))
        if remain == nil or remain <= 0 then
            return -1
        end
        redis.call('HINCRBY', KEYS[2], 'remain', -1)
        redis.call('SADD', KEYS[1], ARGV[1])
        return 1
        ",
    )
});

/// Returns nil when the hash is absent so the caller never resurrects a
/// partial projection.
static INCR_EXISTING_SCRIPT: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
        if redis.call('EXISTS', KEYS[1]) == 0 then
            return false
        end
        return redis.call('HINCRBY', KEYS[1], ARGV[1], ARGV[2])
        ",
    )
});

/// Redis-backed cache store.
///
/// Cloning is cheap: clones share the underlying multiplexed connection,
/// which reconnects on its own after transient failures.
#[derive(Clone)]
pub struct RedisCacheStore {
    /// Connection manager for connection pooling.
    conn_manager: ConnectionManager,
}

impl RedisCacheStore {
    /// Connects to Redis.
    ///
    /// # Arguments
    ///
    /// * `redis_url` - Redis connection URL (e.g., "redis://127.0.0.1:6379")
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Unavailable`] if the URL is invalid or the
    /// initial connection fails.
    pub async fn new(redis_url: &str) -> CacheResult<Self> {
        let client = Client::open(redis_url).map_err(|e| {
            CacheError::Unavailable(format!("Failed to create Redis client: {e}"))
        })?;

        let conn_manager = ConnectionManager::new(client).await.map_err(|e| {
            CacheError::Unavailable(format!("Failed to create Redis connection manager: {e}"))
        })?;

        tracing::info!(url = %redis_url, "Connected to Redis");

        Ok(Self { conn_manager })
    }

    /// Wraps an existing connection manager.
    #[must_use]
    pub const fn from_manager(conn_manager: ConnectionManager) -> Self {
        Self { conn_manager }
    }
}

fn unavailable(action: &str) -> impl Fn(redis::RedisError) -> CacheError + '_ {
    move |e| CacheError::Unavailable(format!("Failed to {action}: {e}"))
}

impl CacheStore for RedisCacheStore {
    async fn hash_get_all(&self, key: &str) -> CacheResult<HashMap<String, String>> {
        let mut conn = self.conn_manager.clone();
        conn.hgetall(key).await.map_err(unavailable("read hash"))
    }

    async fn hash_get(&self, key: &str, field: &str) -> CacheResult<Option<String>> {
        let mut conn = self.conn_manager.clone();
        conn.hget(key, field).await.map_err(unavailable("read hash field"))
    }

    async fn hash_set(&self, key: &str, fields: &[(String, String)]) -> CacheResult<()> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn_manager.clone();
        conn.hset_multiple(key, fields).await.map_err(unavailable("write hash"))
    }

    async fn hash_incr(&self, key: &str, field: &str, delta: i64) -> CacheResult<i64> {
        let mut conn = self.conn_manager.clone();
        conn.hincr(key, field, delta).await.map_err(unavailable("increment hash field"))
    }

    async fn hash_incr_existing(
        &self,
        key: &str,
        field: &str,
        delta: i64,
    ) -> CacheResult<Option<i64>> {
        let mut conn = self.conn_manager.clone();
        let value: Option<i64> = INCR_EXISTING_SCRIPT
            .key(key)
            .arg(field)
            .arg(delta)
            .invoke_async(&mut conn)
            .await
            .map_err(unavailable("increment existing hash field"))?;
        Ok(value)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool> {
        let mut conn = self.conn_manager.clone();
        let seconds = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX).max(1);
        conn.expire(key, seconds).await.map_err(unavailable("set expiry"))
    }

    async fn delete(&self, keys: &[String]) -> CacheResult<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn_manager.clone();
        let removed: u64 = conn.del(keys).await.map_err(unavailable("delete keys"))?;

        tracing::debug!(requested = keys.len(), removed, "Deleted cache keys");

        Ok(())
    }

    async fn set_add(&self, key: &str, member: &str) -> CacheResult<bool> {
        let mut conn = self.conn_manager.clone();
        let added: u64 = conn.sadd(key, member).await.map_err(unavailable("add set member"))?;
        Ok(added > 0)
    }

    async fn set_remove(&self, key: &str, member: &str) -> CacheResult<bool> {
        let mut conn = self.conn_manager.clone();
        let removed: u64 = conn
            .srem(key, member)
            .await
            .map_err(unavailable("remove set member"))?;
        Ok(removed > 0)
    }

    async fn set_is_member(&self, key: &str, member: &str) -> CacheResult<bool> {
        let mut conn = self.conn_manager.clone();
        conn.sismember(key, member).await.map_err(unavailable("check set membership"))
    }

    async fn set_members(&self, key: &str) -> CacheResult<Vec<String>> {
        let mut conn = self.conn_manager.clone();
        conn.smembers(key).await.map_err(unavailable("read set members"))
    }

    async fn set_intersect(&self, keys: &[String]) -> CacheResult<Vec<String>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn_manager.clone();
        conn.sinter(keys).await.map_err(unavailable("intersect sets"))
    }

    async fn list_push(&self, key: &str, value: &str) -> CacheResult<()> {
        let mut conn = self.conn_manager.clone();
        let _: u64 = conn.lpush(key, value).await.map_err(unavailable("push list value"))?;
        Ok(())
    }

    async fn list_range(&self, key: &str, start: isize, stop: isize) -> CacheResult<Vec<String>> {
        let mut conn = self.conn_manager.clone();
        conn.lrange(key, start, stop).await.map_err(unavailable("read list range"))
    }

    async fn sorted_set_incr(&self, key: &str, member: &str, delta: f64) -> CacheResult<f64> {
        let mut conn = self.conn_manager.clone();
        conn.zincr(key, member, delta)
            .await
            .map_err(unavailable("increment sorted set score"))
    }

    async fn sorted_set_add(&self, key: &str, member: &str, score: f64) -> CacheResult<()> {
        let mut conn = self.conn_manager.clone();
        let _: u64 = conn
            .zadd(key, member, score)
            .await
            .map_err(unavailable("add sorted set member"))?;
        Ok(())
    }

    async fn sorted_set_score(&self, key: &str, member: &str) -> CacheResult<Option<f64>> {
        let mut conn = self.conn_manager.clone();
        conn.zscore(key, member).await.map_err(unavailable("read sorted set score"))
    }

    async fn sorted_set_intersect_store(
        &self,
        destination: &str,
        sources: &[(String, f64)],
    ) -> CacheResult<u64> {
        let mut conn = self.conn_manager.clone();

        let mut cmd = redis::cmd("ZINTERSTORE");
        cmd.arg(destination).arg(sources.len());
        for (key, _) in sources {
            cmd.arg(key);
        }
        cmd.arg("WEIGHTS");
        for (_, weight) in sources {
            cmd.arg(*weight);
        }
        cmd.arg("AGGREGATE").arg("SUM");

        let cardinality: u64 = cmd
            .query_async(&mut conn)
            .await
            .map_err(unavailable("intersect sorted sets"))?;
        Ok(cardinality)
    }

    async fn sorted_set_range_desc(&self, key: &str) -> CacheResult<Vec<(String, f64)>> {
        let mut conn = self.conn_manager.clone();
        conn.zrevrange_withscores(key, 0, -1)
            .await
            .map_err(unavailable("read sorted set range"))
    }

    async fn scan_keys(&self, pattern: &str) -> CacheResult<Vec<String>> {
        let mut conn = self.conn_manager.clone();
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(unavailable("scan keys"))?;

            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        // SCAN may return a key more than once
        keys.sort_unstable();
        keys.dedup();

        Ok(keys)
    }

    async fn reserve(
        &self,
        members_key: &str,
        item_key: &str,
        actor: &str,
    ) -> CacheResult<ReserveOutcome> {
        let mut conn = self.conn_manager.clone();
        let code: i64 = RESERVE_SCRIPT
            .key(members_key)
            .key(item_key)
            .arg(actor)
            .invoke_async(&mut conn)
            .await
            .map_err(unavailable("execute reservation script"))?;

        match code {
            1 => Ok(ReserveOutcome::Reserved),
            0 => Ok(ReserveOutcome::AlreadyReserved),
            -1 => Ok(ReserveOutcome::OutOfStock),
            other => Err(CacheError::UnexpectedReply(format!(
                "reservation script returned {other}"
            ))),
        }
    }
}
