//! Read-only cache introspection.

use crate::dependencies::NamespaceCatalog;
use crate::events::EventLog;
use chrono::{DateTime, Utc};
use finboard_cache::CacheStore;
use finboard_core::types::KeyKind;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NamespaceKeyCount {
    /// Cached values (results and error markers).
    pub entries: usize,
    /// In-flight processing locks.
    pub locks: usize,
    /// Every key under the namespace, metadata and stale copies included.
    pub total: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub store_available: bool,
    pub backend: Option<&'static str>,
    /// Absent when the durable tier cannot be scanned.
    pub per_namespace_key_counts: Option<BTreeMap<String, NamespaceKeyCount>>,
    pub recent_event_count: usize,
    pub local_entries: usize,
    pub generated_at: DateTime<Utc>,
}

pub struct HealthReporter {
    store: Arc<CacheStore>,
    catalog: NamespaceCatalog,
    events: Arc<EventLog>,
}

impl HealthReporter {
    pub fn new(store: Arc<CacheStore>, catalog: NamespaceCatalog, events: Arc<EventLog>) -> Self {
        Self {
            store,
            catalog,
            events,
        }
    }

    /// Never fails; an unreachable durable tier yields
    /// `store_available: false` with no key counts.
    pub async fn health_report(&self) -> HealthReport {
        let store_available = self.store.store_available().await;
        let per_namespace_key_counts = if store_available {
            self.count_keys().await
        } else {
            None
        };

        HealthReport {
            store_available,
            backend: self.store.durable_backend(),
            per_namespace_key_counts,
            recent_event_count: self.events.recent_count(),
            local_entries: self.store.local_len(),
            generated_at: self.store.clock().now(),
        }
    }

    async fn count_keys(&self) -> Option<BTreeMap<String, NamespaceKeyCount>> {
        let mut counts = BTreeMap::new();
        for namespace in self.catalog.namespaces() {
            let mut count = NamespaceKeyCount::default();
            for pattern in self.catalog.patterns_for(namespace) {
                let keys = match self.store.keys_matching(&pattern).await {
                    Ok(keys) => keys,
                    Err(e) => {
                        warn!(pattern = %pattern, error = %e, "Key scan failed, omitting key counts");
                        return None;
                    }
                };
                for key in keys {
                    count.total += 1;
                    match KeyKind::of(&key) {
                        KeyKind::Value => count.entries += 1,
                        KeyKind::Processing => count.locks += 1,
                        KeyKind::Meta | KeyKind::Stale => {}
                    }
                }
            }
            counts.insert(namespace.to_string(), count);
        }
        Some(counts)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::registry::InvalidationRegistry;
    use finboard_cache::{CacheEntry, MemoryStore};
    use finboard_core::config::InvalidationConfig;
    use finboard_core::{CacheKey, Clock, FilterSet, ManualClock, Namespace};
    use serde_json::{json, Map};
    use std::time::Duration;

    #[tokio::test]
    async fn test_report_counts_keys_per_namespace() {
        let clock = Arc::new(ManualClock::starting_now());
        let durable = Arc::new(MemoryStore::new(clock.clone()));
        let store = Arc::new(CacheStore::new(Some(durable.clone()), clock.clone(), 100));
        let registry = InvalidationRegistry::new(store.clone(), &InvalidationConfig::default());

        let kpis = CacheKey::derive(&Namespace::KPIS, &FilterSet::new().with("mes", "2024-01"));
        store
            .set(&kpis, &CacheEntry::result(json!(1), clock.now(), Duration::from_secs(60)))
            .await;
        let aging = CacheKey::derive(&Namespace::AGING, &FilterSet::new());
        store.try_lock(&aging, Duration::from_secs(300)).await;
        registry
            .register_data_change("expense_created", &[], Map::new())
            .await;

        let report = registry.health_reporter().health_report().await;
        assert!(report.store_available);
        assert_eq!(report.backend, Some("memory"));
        assert_eq!(report.recent_event_count, 1);

        let counts = report.per_namespace_key_counts.unwrap();
        assert_eq!(counts.len(), 7);
        // expense_created purged kpis.
        assert_eq!(counts["kpis"], NamespaceKeyCount::default());
        assert_eq!(
            counts["aging"],
            NamespaceKeyCount {
                entries: 0,
                locks: 1,
                total: 1
            }
        );
    }

    #[tokio::test]
    async fn test_report_degrades_when_store_is_down() {
        let clock = Arc::new(ManualClock::starting_now());
        let durable = Arc::new(MemoryStore::new(clock.clone()));
        let store = Arc::new(CacheStore::new(Some(durable.clone()), clock, 100));
        let registry = InvalidationRegistry::new(store, &InvalidationConfig::default());

        durable.set_available(false);
        let report = registry.health_reporter().health_report().await;
        assert!(!report.store_available);
        assert!(report.per_namespace_key_counts.is_none());
        assert_eq!(report.recent_event_count, 0);
    }

    #[tokio::test]
    async fn test_report_without_durable_tier() {
        let clock = Arc::new(ManualClock::starting_now());
        let store = Arc::new(CacheStore::local_only(clock, 100));
        let registry = InvalidationRegistry::new(store, &InvalidationConfig::default());
        let report = registry.health_reporter().health_report().await;
        assert!(!report.store_available);
        assert_eq!(report.backend, None);
    }
}
