//! Shared durable key/value tier.
//!
//! The durable tier is optional: a [`crate::CacheStore`] holds
//! `Option<Arc<dyn DurableStore>>` and every call site has a fallback path,
//! so an outage only costs performance.

use async_trait::async_trait;
use finboard_core::{CacheError, CacheResult};
use std::future::Future;
use std::time::Duration;

#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Backend name for logs and health output.
    fn name(&self) -> &'static str;

    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()>;

    /// Set only if the key does not exist. Returns true when written.
    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<bool>;

    async fn exists(&self, key: &str) -> CacheResult<bool>;

    /// Delete the given keys, returns how many existed. A failure after some
    /// keys were removed is reported as [`CacheError::PartialDelete`].
    async fn delete(&self, keys: &[String]) -> CacheResult<u64>;

    /// Delete `key` only while it still holds `expected`. Returns true when
    /// deleted.
    async fn delete_if_eq(&self, key: &str, expected: &str) -> CacheResult<bool>;

    /// All keys matching a glob pattern.
    async fn scan(&self, pattern: &str) -> CacheResult<Vec<String>>;

    /// Liveness probe. Never errors: unreachable is `false`.
    async fn ping(&self) -> bool;
}

/// TTLs below one second are rounded up; `EX 0` is rejected by Redis.
pub(crate) fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

/// Delete `keys` in chunks of `batch`, keeping the running count when a
/// chunk fails.
pub(crate) async fn delete_in_batches<F, Fut>(keys: &[String], batch: usize, mut delete: F) -> CacheResult<u64>
where
    F: FnMut(Vec<String>) -> Fut,
    Fut: Future<Output = CacheResult<u64>>,
{
    let mut deleted = 0;
    for chunk in keys.chunks(batch.max(1)) {
        match delete(chunk.to_vec()).await {
            Ok(count) => deleted += count,
            Err(e) if deleted == 0 => return Err(e),
            Err(e) => {
                return Err(CacheError::PartialDelete {
                    deleted: deleted + e.deleted_before_failure(),
                    reason: e.to_string(),
                })
            }
        }
    }
    Ok(deleted)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn keys(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("kpis:{i}")).collect()
    }

    #[tokio::test]
    async fn test_batches_sum_counts() {
        let deleted = delete_in_batches(&keys(1200), 500, |chunk| async move { Ok(chunk.len() as u64) })
            .await
            .unwrap();
        assert_eq!(deleted, 1200);
    }

    #[tokio::test]
    async fn test_failed_batch_keeps_earlier_count() {
        let mut calls = 0;
        let err = delete_in_batches(&keys(1200), 500, |chunk| {
            calls += 1;
            let fail = calls == 2;
            async move {
                if fail {
                    Err(CacheError::StoreUnavailable("DEL: timed out".into()))
                } else {
                    Ok(chunk.len() as u64)
                }
            }
        })
        .await
        .unwrap_err();
        assert_eq!(err.deleted_before_failure(), 500);
        assert!(matches!(err, CacheError::PartialDelete { .. }));
    }

    #[tokio::test]
    async fn test_first_batch_failure_is_plain_error() {
        let err = delete_in_batches(&keys(10), 5, |_| async {
            Err(CacheError::StoreUnavailable("down".into()))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, CacheError::StoreUnavailable(_)));
    }
}
