//! Freshness decisions for cached entries.

use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Freshness {
    Miss,
    Fresh,
    Stale,
}

/// Decides whether an entry satisfies a caller's staleness tolerance.
///
/// `stale_after` is a separate, fixed threshold used only to tag responses
/// for telemetry and UI; it never influences the `max_age` decision.
#[derive(Debug, Clone, Copy)]
pub struct FreshnessPolicy {
    stale_after: Duration,
}

impl FreshnessPolicy {
    pub fn new(stale_after: Duration) -> Self {
        Self { stale_after }
    }

    /// `age` is `None` when no entry exists. Without `max_age` any existing
    /// entry is acceptable.
    pub fn evaluate(&self, age: Option<Duration>, max_age: Option<Duration>) -> Freshness {
        match (age, max_age) {
            (None, _) => Freshness::Miss,
            (Some(_), None) => Freshness::Fresh,
            (Some(age), Some(max)) if age <= max => Freshness::Fresh,
            (Some(_), Some(_)) => Freshness::Stale,
        }
    }

    pub fn is_telemetry_stale(&self, age: Duration) -> bool {
        age > self.stale_after
    }

    pub fn stale_after(&self) -> Duration {
        self.stale_after
    }
}

impl Default for FreshnessPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}
