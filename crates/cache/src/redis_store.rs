//! Redis-backed durable tier.

use crate::durable::{delete_in_batches, ttl_secs, DurableStore};
use async_trait::async_trait;
use finboard_core::config::RedisConfig;
use finboard_core::{CacheError, CacheResult};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info};

/// Scans walk the whole keyspace, so they get a wider budget than point ops.
const SCAN_TIMEOUT_FACTOR: u32 = 20;

/// Compare-and-delete: only the lock holder's value is removed.
const DELETE_IF_EQ_SCRIPT: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
";

pub struct RedisStore {
    manager: ConnectionManager,
    op_timeout: Duration,
    delete_batch: usize,
    delete_if_eq: redis::Script,
}

impl RedisStore {
    /// Connect to Redis and verify connectivity with PING.
    pub async fn connect(config: &RedisConfig) -> CacheResult<Self> {
        let url = config
            .urls
            .first()
            .cloned()
            .unwrap_or_else(|| "redis://localhost:6379".to_string());

        info!(url = %url, "Connecting to Redis");

        let client = redis::Client::open(url.as_str()).map_err(unavailable)?;
        let connect_timeout = Duration::from_millis(config.connect_timeout_ms);
        let manager = tokio::time::timeout(connect_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| CacheError::StoreUnavailable(format!("connect to {url} timed out")))?
            .map_err(unavailable)?;

        let store = Self {
            manager,
            op_timeout: Duration::from_millis(config.op_timeout_ms),
            delete_batch: config.delete_batch.max(1),
            delete_if_eq: redis::Script::new(DELETE_IF_EQ_SCRIPT),
        };

        if !store.ping().await {
            return Err(CacheError::StoreUnavailable(format!("{url} did not answer PING")));
        }
        info!("Redis connection established");
        Ok(store)
    }

    async fn run<T, F>(&self, op: &'static str, timeout: Duration, fut: F) -> CacheResult<T>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match tokio::time::timeout(timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(CacheError::StoreUnavailable(format!("{op}: {e}"))),
            Err(_) => Err(CacheError::StoreUnavailable(format!("{op}: timed out"))),
        }
    }
}

fn unavailable(e: redis::RedisError) -> CacheError {
    CacheError::StoreUnavailable(e.to_string())
}

#[async_trait]
impl DurableStore for RedisStore {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let mut conn = self.manager.clone();
        self.run("GET", self.op_timeout, async move {
            conn.get::<_, Option<String>>(key).await
        })
        .await
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        let mut conn = self.manager.clone();
        self.run("SETEX", self.op_timeout, async move {
            conn.set_ex::<_, _, ()>(key, value, ttl_secs(ttl)).await
        })
        .await
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<bool> {
        let mut conn = self.manager.clone();
        let reply: Option<String> = self
            .run("SET NX", self.op_timeout, async move {
                redis::cmd("SET")
                    .arg(key)
                    .arg(value)
                    .arg("NX")
                    .arg("EX")
                    .arg(ttl_secs(ttl))
                    .query_async(&mut conn)
                    .await
            })
            .await?;
        Ok(reply.is_some())
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        let mut conn = self.manager.clone();
        self.run("EXISTS", self.op_timeout, async move {
            conn.exists::<_, bool>(key).await
        })
        .await
    }

    async fn delete(&self, keys: &[String]) -> CacheResult<u64> {
        delete_in_batches(keys, self.delete_batch, |batch| {
            let mut conn = self.manager.clone();
            self.run("DEL", self.op_timeout, async move {
                conn.del::<_, u64>(batch).await
            })
        })
        .await
    }

    async fn delete_if_eq(&self, key: &str, expected: &str) -> CacheResult<bool> {
        let mut conn = self.manager.clone();
        let script = self.delete_if_eq.clone();
        let removed: i64 = self
            .run("DEL IF EQ", self.op_timeout, async move {
                script
                    .key(key)
                    .arg(expected)
                    .invoke_async::<_, i64>(&mut conn)
                    .await
            })
            .await?;
        Ok(removed > 0)
    }

    async fn scan(&self, pattern: &str) -> CacheResult<Vec<String>> {
        let mut conn = self.manager.clone();
        let keys = self
            .run("SCAN", self.op_timeout * SCAN_TIMEOUT_FACTOR, async move {
                let mut iter = conn.scan_match::<_, String>(pattern).await?;
                let mut keys = Vec::new();
                while let Some(key) = iter.next_item().await {
                    keys.push(key);
                }
                Ok::<_, redis::RedisError>(keys)
            })
            .await?;
        debug!(pattern = pattern, count = keys.len(), "Redis scan complete");
        Ok(keys)
    }

    async fn ping(&self) -> bool {
        let mut conn = self.manager.clone();
        let reply: CacheResult<String> = self
            .run("PING", self.op_timeout, async move {
                redis::cmd("PING").query_async(&mut conn).await
            })
            .await;
        matches!(reply.as_deref(), Ok("PONG"))
    }
}
