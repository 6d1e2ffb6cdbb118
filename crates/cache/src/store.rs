//! Two-tier cache store: shared durable tier (L2) with a process-local tier
//! (L1) that is always written and serves reads whenever L2 is absent or
//! failing.

use crate::durable::DurableStore;
use crate::entry::{CacheEntry, EntryMeta};
use crate::local::LocalCache;
use finboard_core::types::KeyKind;
use finboard_core::{CacheKey, Clock};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Proof of one lock acquisition. Releasing with it only removes the lock
/// while that acquisition still owns it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken {
    id: Uuid,
    marker: String,
}

impl LockToken {
    pub fn id(&self) -> Uuid {
        self.id
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockOutcome {
    Acquired(LockToken),
    /// Another computation holds an unexpired lock.
    Held,
}

impl LockOutcome {
    pub fn is_acquired(&self) -> bool {
        matches!(self, LockOutcome::Acquired(_))
    }
}

/// Result of a pattern purge. Partial failures are reported, never raised.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PurgeOutcome {
    pub deleted: u64,
    pub local_removed: usize,
    pub error: Option<String>,
}

impl PurgeOutcome {
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Serialize)]
struct LockMarker {
    token: Uuid,
    acquired_at: chrono::DateTime<chrono::Utc>,
    ttl_secs: u64,
}

pub struct CacheStore {
    durable: Option<Arc<dyn DurableStore>>,
    local: LocalCache,
    clock: Arc<dyn Clock>,
}

impl CacheStore {
    pub fn new(
        durable: Option<Arc<dyn DurableStore>>,
        clock: Arc<dyn Clock>,
        local_max_entries: usize,
    ) -> Self {
        Self {
            durable,
            local: LocalCache::new(clock.clone(), local_max_entries),
            clock,
        }
    }

    /// Store with no durable tier: every read and write is process-local.
    pub fn local_only(clock: Arc<dyn Clock>, local_max_entries: usize) -> Self {
        Self::new(None, clock, local_max_entries)
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn durable_backend(&self) -> Option<&'static str> {
        self.durable.as_ref().map(|d| d.name())
    }

    /// Explicit capability probe for the durable tier.
    pub async fn store_available(&self) -> bool {
        match &self.durable {
            Some(durable) => durable.ping().await,
            None => false,
        }
    }

    pub async fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.get_entry(key.as_str()).await
    }

    /// Read an entry by raw key. Durable tier first; a durable error or an
    /// unreadable durable value falls back to the local tier. Absent only
    /// when neither tier holds a valid entry.
    pub async fn get_entry(&self, raw_key: &str) -> Option<CacheEntry> {
        if let Some(durable) = &self.durable {
            match durable.get(raw_key).await {
                Ok(Some(raw)) => {
                    if let Some(entry) = self.decode(raw_key, &raw) {
                        metrics::counter!("cache.durable.hit").increment(1);
                        // Populate L1
                        self.local.put(raw_key, raw, entry.remaining(self.clock.as_ref()));
                        return Some(entry);
                    }
                    // Unreadable durable copy: the local tier may still hold a good one.
                }
                Ok(None) => {
                    metrics::counter!("cache.durable.miss").increment(1);
                    return None;
                }
                Err(e) => {
                    metrics::counter!("cache.durable.error").increment(1);
                    warn!(key = raw_key, error = %e, "Durable get failed, falling back to local tier");
                }
            }
        }

        match self.local.get(raw_key) {
            Some(raw) => {
                metrics::counter!("cache.local.hit").increment(1);
                self.decode(raw_key, &raw)
            }
            None => {
                metrics::counter!("cache.local.miss").increment(1);
                None
            }
        }
    }

    /// Write a result or error marker plus its `:meta` record.
    pub async fn set(&self, key: &CacheKey, entry: &CacheEntry) {
        self.put_entry(key.as_str(), entry).await;
        match serde_json::to_string(&entry.meta()) {
            Ok(meta) => self.put_raw(&key.meta_key(), meta, entry.ttl()).await,
            Err(e) => warn!(key = %key, error = %e, "Failed to serialize entry metadata"),
        }
    }

    /// Write an entry under a raw key: best effort to the durable tier,
    /// unconditionally to the local tier.
    pub async fn put_entry(&self, raw_key: &str, entry: &CacheEntry) {
        match serde_json::to_string(entry) {
            Ok(raw) => self.put_raw(raw_key, raw, entry.ttl()).await,
            Err(e) => warn!(key = raw_key, error = %e, "Failed to serialize cache entry"),
        }
    }

    async fn put_raw(&self, raw_key: &str, raw: String, ttl: Duration) {
        if let Some(durable) = &self.durable {
            if let Err(e) = durable.set_ex(raw_key, &raw, ttl).await {
                metrics::counter!("cache.durable.error").increment(1);
                warn!(key = raw_key, error = %e, "Durable set failed, entry kept in local tier only");
            }
        }
        self.local.put(raw_key, raw, ttl);
    }

    /// Age/TTL metadata for a key without reading its payload.
    pub async fn inspect(&self, key: &CacheKey) -> Option<EntryMeta> {
        let meta_key = key.meta_key();
        let raw = match &self.durable {
            Some(durable) => match durable.get(&meta_key).await {
                Ok(raw) => raw,
                Err(e) => {
                    debug!(key = %key, error = %e, "Durable meta read failed, using local tier");
                    self.local.get(&meta_key)
                }
            },
            None => self.local.get(&meta_key),
        }?;
        serde_json::from_str(&raw)
            .map_err(|e| warn!(key = %key, error = %e, "Corrupt entry metadata"))
            .ok()
    }

    /// Try to take the processing lock for a key. Uses `SET NX EX` on the
    /// durable tier; if that fails the local tier provides the lock, so an
    /// outage still suppresses duplicate work within this process.
    pub async fn try_lock(&self, key: &CacheKey, ttl: Duration) -> LockOutcome {
        let lock_key = key.processing_key();
        let id = Uuid::new_v4();
        let marker = serde_json::to_string(&LockMarker {
            token: id,
            acquired_at: self.clock.now(),
            ttl_secs: ttl.as_secs(),
        })
        .unwrap_or_else(|_| id.to_string());
        let token = LockToken {
            id,
            marker: marker.clone(),
        };

        if let Some(durable) = &self.durable {
            match durable.set_nx_ex(&lock_key, &marker, ttl).await {
                Ok(true) => {
                    self.local.put(&lock_key, marker, ttl);
                    return LockOutcome::Acquired(token);
                }
                Ok(false) => {
                    metrics::counter!("cache.lock.contended").increment(1);
                    return LockOutcome::Held;
                }
                Err(e) => {
                    metrics::counter!("cache.durable.error").increment(1);
                    warn!(key = %key, error = %e, "Durable lock failed, using local lock");
                }
            }
        }

        if self.local.put_if_absent(&lock_key, marker, ttl) {
            LockOutcome::Acquired(token)
        } else {
            metrics::counter!("cache.lock.contended").increment(1);
            LockOutcome::Held
        }
    }

    pub async fn is_locked(&self, key: &CacheKey) -> bool {
        let lock_key = key.processing_key();
        if let Some(durable) = &self.durable {
            match durable.exists(&lock_key).await {
                Ok(held) => return held,
                Err(e) => {
                    debug!(key = %key, error = %e, "Durable lock check failed, using local tier");
                }
            }
        }
        self.local.contains(&lock_key)
    }

    /// Release a lock taken with `token`. A lock that expired and was taken
    /// by someone else is left alone.
    pub async fn release_lock(&self, key: &CacheKey, token: &LockToken) {
        let lock_key = key.processing_key();
        if let Some(durable) = &self.durable {
            match durable.delete_if_eq(&lock_key, &token.marker).await {
                Ok(true) => {}
                Ok(false) => debug!(key = %key, token = %token.id, "Lock no longer owned, nothing to release"),
                // The lock TTL clears it eventually.
                Err(e) => warn!(key = %key, error = %e, "Failed to release durable lock"),
            }
        }
        self.local.remove_if_eq(&lock_key, &token.marker);
    }

    /// Remove all keys matching a glob from both tiers. Processing locks are
    /// kept so in-flight computations stay exclusive. `deleted` counts
    /// durable keys when a durable tier is configured, local keys otherwise,
    /// and includes keys removed before a failure.
    pub async fn delete_pattern(&self, pattern: &str) -> PurgeOutcome {
        let purgeable = |key: &str| KeyKind::of(key) != KeyKind::Processing;
        let local_removed = self.local.remove_matching(pattern, purgeable);

        let Some(durable) = &self.durable else {
            return PurgeOutcome {
                deleted: local_removed as u64,
                local_removed,
                error: None,
            };
        };

        let outcome = match durable.scan(pattern).await {
            Ok(keys) => {
                let keys: Vec<String> = keys.into_iter().filter(|k| purgeable(k.as_str())).collect();
                if keys.is_empty() {
                    PurgeOutcome {
                        deleted: 0,
                        local_removed,
                        error: None,
                    }
                } else {
                    match durable.delete(&keys).await {
                        Ok(deleted) => PurgeOutcome {
                            deleted,
                            local_removed,
                            error: None,
                        },
                        Err(e) => PurgeOutcome {
                            deleted: e.deleted_before_failure(),
                            local_removed,
                            error: Some(e.to_string()),
                        },
                    }
                }
            }
            Err(e) => PurgeOutcome {
                deleted: 0,
                local_removed,
                error: Some(e.to_string()),
            },
        };

        match &outcome.error {
            Some(error) => warn!(
                pattern = pattern,
                deleted = outcome.deleted,
                error = %error,
                "Pattern purge failed on durable tier"
            ),
            None => debug!(pattern = pattern, deleted = outcome.deleted, "Pattern purged"),
        }
        metrics::counter!("cache.purged").increment(outcome.deleted);
        outcome
    }

    /// Keys matching a glob on the durable tier, or the local tier when no
    /// durable tier is configured. Errors when the durable tier fails.
    pub async fn keys_matching(&self, pattern: &str) -> finboard_core::CacheResult<Vec<String>> {
        match &self.durable {
            Some(durable) => durable.scan(pattern).await,
            None => Ok(self.local.keys_matching(pattern)),
        }
    }

    /// Number of keys matching a glob, counted where `keys_matching` looks.
    pub async fn count_pattern(&self, pattern: &str) -> finboard_core::CacheResult<usize> {
        Ok(self.keys_matching(pattern).await?.len())
    }

    /// Periodic local-tier sweep.
    pub fn maintenance(&self) -> usize {
        let evicted = self.local.evict_expired();
        if evicted > 0 {
            debug!(evicted = evicted, "Local cache eviction complete");
        }
        evicted
    }

    pub fn local_len(&self) -> usize {
        self.local.len()
    }

    fn decode(&self, raw_key: &str, raw: &str) -> Option<CacheEntry> {
        let entry: CacheEntry = match serde_json::from_str(raw) {
            Ok(entry) => entry,
            Err(e) => {
                metrics::counter!("cache.corrupt").increment(1);
                warn!(key = raw_key, error = %e, "Corrupt cache entry treated as miss");
                return None;
            }
        };
        if entry.is_expired(self.clock.as_ref()) {
            return None;
        }
        Some(entry)
    }
}
