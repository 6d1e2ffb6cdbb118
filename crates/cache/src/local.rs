//! In-process cache tier backed by DashMap for lock-free concurrent access.
//! Always written, and read whenever the durable tier is absent or failing.

use crate::glob::glob_match;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use finboard_core::clock::{elapsed_since, Clock};
use std::sync::Arc;
use std::time::Duration;

struct LocalEntry {
    raw: String,
    inserted_at: DateTime<Utc>,
    ttl: Duration,
}

impl LocalEntry {
    fn is_expired(&self, clock: &dyn Clock) -> bool {
        elapsed_since(clock, self.inserted_at) >= self.ttl
    }
}

/// Process-local key/value tier holding serialized entries with their own TTL.
pub struct LocalCache {
    store: DashMap<String, LocalEntry>,
    clock: Arc<dyn Clock>,
    max_entries: usize,
}

impl LocalCache {
    pub fn new(clock: Arc<dyn Clock>, max_entries: usize) -> Self {
        Self {
            store: DashMap::new(),
            clock,
            max_entries,
        }
    }

    /// Get a raw value, returns None if expired or missing.
    pub fn get(&self, key: &str) -> Option<String> {
        let clock = self.clock.as_ref();
        {
            let entry = self.store.get(key)?;
            if !entry.is_expired(clock) {
                return Some(entry.raw.clone());
            }
        }
        // Re-checked under the shard lock: a concurrent put may have replaced it.
        self.store.remove_if(key, |_, entry| entry.is_expired(clock));
        None
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Insert or update a value.
    pub fn put(&self, key: &str, raw: String, ttl: Duration) {
        if self.store.len() >= self.max_entries && !self.store.contains_key(key) {
            self.evict_expired();
            // Still full: skip insert, the durable tier remains authoritative.
            if self.store.len() >= self.max_entries {
                metrics::counter!("cache.local.rejected").increment(1);
                return;
            }
        }
        self.store.insert(key.to_string(), self.entry(raw, ttl));
    }

    /// Atomically insert unless an unexpired value is present.
    /// Returns true when the value was inserted.
    pub fn put_if_absent(&self, key: &str, raw: String, ttl: Duration) -> bool {
        let fresh = self.entry(raw, ttl);
        match self.store.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired(self.clock.as_ref()) {
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
        }
    }

    /// Remove `key` only while it still holds `raw`.
    pub fn remove_if_eq(&self, key: &str, raw: &str) -> bool {
        self.store.remove_if(key, |_, entry| entry.raw == raw).is_some()
    }

    /// Remove every key matching a glob pattern for which `purgeable` holds,
    /// returns the number removed.
    pub fn remove_matching(&self, pattern: &str, purgeable: impl Fn(&str) -> bool) -> usize {
        let before = self.store.len();
        self.store
            .retain(|key, _| !(glob_match(pattern, key) && purgeable(key)));
        before.saturating_sub(self.store.len())
    }

    /// Unexpired keys matching a glob pattern.
    pub fn keys_matching(&self, pattern: &str) -> Vec<String> {
        self.store
            .iter()
            .filter(|e| !e.value().is_expired(self.clock.as_ref()) && glob_match(pattern, e.key()))
            .map(|e| e.key().clone())
            .collect()
    }

    /// Remove expired entries. Call this periodically from a background task.
    pub fn evict_expired(&self) -> usize {
        let before = self.store.len();
        let clock = self.clock.clone();
        self.store.retain(|_, entry| !entry.is_expired(clock.as_ref()));
        before.saturating_sub(self.store.len())
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    fn entry(&self, raw: String, ttl: Duration) -> LocalEntry {
        LocalEntry {
            raw,
            inserted_at: self.clock.now(),
            ttl,
        }
    }
}
