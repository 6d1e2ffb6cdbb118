//! Bounded-retention audit trail of invalidations.

use crate::dependencies::EntityType;
use chrono::{DateTime, Utc};
use finboard_core::clock::{elapsed_since, Clock};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct InvalidationEvent {
    pub id: Uuid,
    pub operation: String,
    pub affected_ids: Vec<String>,
    pub entity_types: Vec<EntityType>,
    pub resolved_namespaces: Vec<String>,
    pub purged: u64,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
    pub metadata: Map<String, Value>,
}

/// Events older than the retention window, or beyond `max_events`, are
/// dropped oldest first.
pub struct EventLog {
    events: Mutex<VecDeque<InvalidationEvent>>,
    retention: Duration,
    max_events: usize,
    clock: Arc<dyn Clock>,
}

impl EventLog {
    pub fn new(clock: Arc<dyn Clock>, retention: Duration, max_events: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::new()),
            retention,
            max_events: max_events.max(1),
            clock,
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn record(&self, event: InvalidationEvent) {
        let mut events = self.events.lock();
        events.push_back(event);
        while events.len() > self.max_events {
            events.pop_front();
        }
        self.prune_locked(&mut events);
    }

    /// Retained events, oldest first.
    pub fn recent(&self) -> Vec<InvalidationEvent> {
        let mut events = self.events.lock();
        self.prune_locked(&mut events);
        events.iter().cloned().collect()
    }

    pub fn recent_count(&self) -> usize {
        let mut events = self.events.lock();
        self.prune_locked(&mut events);
        events.len()
    }

    fn prune_locked(&self, events: &mut VecDeque<InvalidationEvent>) {
        let clock = self.clock.as_ref();
        while events
            .front()
            .is_some_and(|e| elapsed_since(clock, e.timestamp) > self.retention)
        {
            events.pop_front();
        }
    }
}
