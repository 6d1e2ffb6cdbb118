//! In-memory durable backend, for single-node deployments and tests.
//!
//! Expiry follows the injected [`Clock`] so tests can simulate time, and an
//! outage switch makes every call fail the way an unreachable Redis would.

use crate::durable::DurableStore;
use crate::glob::glob_match;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use finboard_core::{CacheError, CacheResult, Clock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct StoredValue {
    value: String,
    expires_at: DateTime<Utc>,
}

pub struct MemoryStore {
    entries: DashMap<String, StoredValue>,
    clock: Arc<dyn Clock>,
    available: AtomicBool,
    calls: AtomicU64,
}

impl MemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
            available: AtomicBool::new(true),
            calls: AtomicU64::new(0),
        }
    }

    /// Simulate an outage (`false`) or recovery (`true`).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of store operations attempted, including failed ones.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Unexpired key count.
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        self.entries.iter().filter(|e| e.value().expires_at > now).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check(&self) -> CacheResult<DateTime<Utc>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.available.load(Ordering::SeqCst) {
            Ok(self.clock.now())
        } else {
            Err(CacheError::StoreUnavailable("memory store offline".to_string()))
        }
    }

    fn stored(&self, value: &str, ttl: Duration, now: DateTime<Utc>) -> StoredValue {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(36_500));
        StoredValue {
            value: value.to_string(),
            expires_at: now + ttl,
        }
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let now = self.check()?;
        let value = self
            .entries
            .get(key)
            .filter(|e| e.expires_at > now)
            .map(|e| e.value.clone());
        if value.is_none() {
            self.entries.remove_if(key, |_, e| e.expires_at <= now);
        }
        Ok(value)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        let now = self.check()?;
        self.entries.insert(key.to_string(), self.stored(value, ttl, now));
        Ok(())
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<bool> {
        let now = self.check()?;
        let fresh = self.stored(value, ttl, now);
        let written = match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().expires_at <= now {
                    occupied.insert(fresh);
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(fresh);
                true
            }
        };
        Ok(written)
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        let now = self.check()?;
        Ok(self.entries.get(key).is_some_and(|e| e.expires_at > now))
    }

    async fn delete(&self, keys: &[String]) -> CacheResult<u64> {
        let now = self.check()?;
        let deleted = keys
            .iter()
            .filter_map(|k| self.entries.remove(k))
            .filter(|(_, e)| e.expires_at > now)
            .count();
        Ok(deleted as u64)
    }

    async fn delete_if_eq(&self, key: &str, expected: &str) -> CacheResult<bool> {
        let now = self.check()?;
        Ok(self
            .entries
            .remove_if(key, |_, e| e.expires_at > now && e.value == expected)
            .is_some())
    }

    async fn scan(&self, pattern: &str) -> CacheResult<Vec<String>> {
        let now = self.check()?;
        Ok(self
            .entries
            .iter()
            .filter(|e| e.value().expires_at > now && glob_match(pattern, e.key()))
            .map(|e| e.key().clone())
            .collect())
    }

    async fn ping(&self) -> bool {
        self.check().is_ok()
    }
}
