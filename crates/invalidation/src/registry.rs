//! Data-change driven cache invalidation.
//!
//! Mutations are reported by operation name. The registry resolves them to
//! the namespaces whose results depend on the changed entities, purges those
//! namespaces from both cache tiers, and keeps an audit event. Nothing here
//! returns an error to the mutation path; failures are folded into the
//! result.

use crate::dependencies::{resolve_operation, EntityType, NamespaceCatalog, NamespaceDependencyMap};
use crate::events::{EventLog, InvalidationEvent};
use crate::health::HealthReporter;
use finboard_cache::CacheStore;
use finboard_core::config::InvalidationConfig;
use finboard_core::{CacheError, Namespace};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct InvalidationResult {
    pub success: bool,
    pub purged_count: u64,
    pub namespaces: Vec<String>,
    pub failed_patterns: Vec<String>,
    pub event_id: Uuid,
}

#[derive(Debug, Clone, Serialize)]
pub struct ForceInvalidationResult {
    pub purged_count: u64,
    pub per_namespace: BTreeMap<String, u64>,
    pub failed_patterns: Vec<String>,
}

#[derive(Default)]
struct PurgeTally {
    purged: u64,
    per_namespace: BTreeMap<String, u64>,
    failed_patterns: Vec<String>,
    patterns: usize,
}

pub struct InvalidationRegistry {
    store: Arc<CacheStore>,
    dependencies: NamespaceDependencyMap,
    catalog: NamespaceCatalog,
    events: Arc<EventLog>,
}

impl InvalidationRegistry {
    pub fn new(store: Arc<CacheStore>, config: &InvalidationConfig) -> Self {
        let events = Arc::new(EventLog::new(
            store.clock().clone(),
            config.event_retention(),
            config.max_events,
        ));
        Self {
            store,
            dependencies: NamespaceDependencyMap::default(),
            catalog: NamespaceCatalog::default(),
            events,
        }
    }

    pub fn with_dependencies(mut self, dependencies: NamespaceDependencyMap) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn with_catalog(mut self, catalog: NamespaceCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Reporter sharing this registry's store, catalog and event log.
    pub fn health_reporter(&self) -> HealthReporter {
        HealthReporter::new(self.store.clone(), self.catalog.clone(), self.events.clone())
    }

    pub async fn register_data_change(
        &self,
        operation: &str,
        affected_ids: &[String],
        metadata: Map<String, Value>,
    ) -> InvalidationResult {
        let resolution = resolve_operation(operation);
        if !resolution.known {
            warn!(operation = operation, "Unknown operation, invalidating every namespace");
        }

        let mut namespaces = self.dependencies.resolve(&resolution.entity_types);
        if namespaces.is_empty() {
            warn!(operation = operation, "No dependent namespaces resolved, invalidating every namespace");
            namespaces = self.catalog.namespaces().cloned().collect();
        }

        let entity_types = resolution.entity_types.into_iter().collect();
        self.purge_and_record(operation, affected_ids, entity_types, &namespaces, metadata)
            .await
    }

    /// Purge every declared namespace.
    pub async fn force_invalidate_all(&self) -> ForceInvalidationResult {
        let namespaces: BTreeSet<Namespace> = self.catalog.namespaces().cloned().collect();
        let tally = self.purge(&namespaces).await;
        self.record(
            "force_invalidate_all",
            &[],
            EntityType::ALL.to_vec(),
            &namespaces,
            Map::new(),
            &tally,
        );
        info!(purged = tally.purged, failed = tally.failed_patterns.len(), "All namespaces invalidated");
        ForceInvalidationResult {
            purged_count: tally.purged,
            per_namespace: tally.per_namespace,
            failed_patterns: tally.failed_patterns,
        }
    }

    pub async fn invalidate_namespace(&self, namespace: &Namespace) -> InvalidationResult {
        let mut metadata = Map::new();
        metadata.insert("namespace".into(), Value::String(namespace.to_string()));
        let namespaces = BTreeSet::from([namespace.clone()]);
        self.purge_and_record("invalidate_namespace", &[], Vec::new(), &namespaces, metadata)
            .await
    }

    pub fn recent_events(&self) -> Vec<InvalidationEvent> {
        self.events.recent()
    }

    async fn purge_and_record(
        &self,
        operation: &str,
        affected_ids: &[String],
        entity_types: Vec<EntityType>,
        namespaces: &BTreeSet<Namespace>,
        metadata: Map<String, Value>,
    ) -> InvalidationResult {
        let tally = self.purge(namespaces).await;
        let event_id = self.record(operation, affected_ids, entity_types, namespaces, metadata, &tally);
        let success = tally.failed_patterns.is_empty();

        if success {
            info!(
                operation = operation,
                namespaces = namespaces.len(),
                purged = tally.purged,
                "Cache invalidated"
            );
        } else {
            let error = CacheError::InvalidationPartialFailure {
                failed: tally.failed_patterns.len(),
                total: tally.patterns,
            };
            warn!(operation = operation, purged = tally.purged, error = %error, "Cache invalidation incomplete");
        }

        InvalidationResult {
            success,
            purged_count: tally.purged,
            namespaces: namespaces.iter().map(|ns| ns.to_string()).collect(),
            failed_patterns: tally.failed_patterns,
            event_id,
        }
    }

    async fn purge(&self, namespaces: &BTreeSet<Namespace>) -> PurgeTally {
        let mut tally = PurgeTally::default();
        for namespace in namespaces {
            let mut namespace_purged = 0;
            for pattern in self.catalog.patterns_for(namespace) {
                tally.patterns += 1;
                let outcome = self.store.delete_pattern(&pattern).await;
                namespace_purged += outcome.deleted;
                if !outcome.is_complete() {
                    tally.failed_patterns.push(pattern);
                }
            }
            metrics::counter!("invalidation.purged", "namespace" => namespace.to_string())
                .increment(namespace_purged);
            tally.purged += namespace_purged;
            tally.per_namespace.insert(namespace.to_string(), namespace_purged);
        }
        tally
    }

    fn record(
        &self,
        operation: &str,
        affected_ids: &[String],
        entity_types: Vec<EntityType>,
        namespaces: &BTreeSet<Namespace>,
        metadata: Map<String, Value>,
        tally: &PurgeTally,
    ) -> Uuid {
        let id = Uuid::new_v4();
        self.events.record(InvalidationEvent {
            id,
            operation: operation.to_string(),
            affected_ids: affected_ids.to_vec(),
            entity_types,
            resolved_namespaces: namespaces.iter().map(|ns| ns.to_string()).collect(),
            purged: tally.purged,
            success: tally.failed_patterns.is_empty(),
            timestamp: self.events.clock().now(),
            metadata,
        });
        id
    }
}
