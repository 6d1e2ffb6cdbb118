//! Stored envelope for cached dashboard results.
//!
//! The envelope carries its own creation timestamp and declared TTL so age
//! is always computed from the entry itself, never from the backing store's
//! expiry bookkeeping.

use chrono::{DateTime, Utc};
use finboard_core::clock::{elapsed_since, Clock};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Result,
    /// Short-lived negative result recorded after a failed compute.
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub kind: EntryKind,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub stored_at: DateTime<Utc>,
    pub ttl_secs: u64,
}

/// Age/TTL record written next to each value under `<key>:meta`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryMeta {
    pub kind: EntryKind,
    pub stored_at: DateTime<Utc>,
    pub ttl_secs: u64,
}

impl CacheEntry {
    pub fn result(payload: serde_json::Value, stored_at: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            kind: EntryKind::Result,
            payload,
            error: None,
            stored_at,
            ttl_secs: ttl.as_secs(),
        }
    }

    pub fn error(message: impl Into<String>, stored_at: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            kind: EntryKind::Error,
            payload: serde_json::Value::Null,
            error: Some(message.into()),
            stored_at,
            ttl_secs: ttl.as_secs(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.kind == EntryKind::Error
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn age(&self, clock: &dyn Clock) -> Duration {
        elapsed_since(clock, self.stored_at)
    }

    pub fn is_expired(&self, clock: &dyn Clock) -> bool {
        self.age(clock) >= self.ttl()
    }

    /// TTL left before the entry expires by its own timestamp.
    pub fn remaining(&self, clock: &dyn Clock) -> Duration {
        self.ttl().saturating_sub(self.age(clock))
    }

    pub fn meta(&self) -> EntryMeta {
        EntryMeta {
            kind: self.kind,
            stored_at: self.stored_at,
            ttl_secs: self.ttl_secs,
        }
    }

    /// Same payload re-stamped with a different TTL (for the long-lived
    /// stale fallback copy).
    pub fn with_ttl(&self, ttl: Duration) -> Self {
        Self {
            ttl_secs: ttl.as_secs(),
            ..self.clone()
        }
    }
}
