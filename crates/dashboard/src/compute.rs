//! The analytic compute capability the orchestrator wraps.

use async_trait::async_trait;
use finboard_core::{FilterSet, Namespace};
use serde_json::Value;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ComputeError {
    pub message: String,
    /// Worth retrying (timeouts, lost connections).
    pub transient: bool,
}

impl ComputeError {
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: false,
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: true,
        }
    }
}

pub type ComputeOutcome = Result<Value, ComputeError>;

/// Produces the payload for one namespace and filter set. Possibly slow,
/// never cached by the implementor.
#[async_trait]
pub trait ComputeCapability: Send + Sync {
    async fn compute(&self, namespace: &Namespace, filters: &FilterSet) -> ComputeOutcome;

    /// Cheap approximation returned immediately in partial mode while the
    /// full computation runs in the background.
    async fn compute_partial(&self, _namespace: &Namespace, _filters: &FilterSet) -> Option<Value> {
        None
    }
}

/// Adapts a synchronous compute function by running it on the blocking pool.
pub struct BlockingCompute<F> {
    func: Arc<F>,
}

impl<F> BlockingCompute<F>
where
    F: Fn(&Namespace, &FilterSet) -> ComputeOutcome + Send + Sync + 'static,
{
    pub fn new(func: F) -> Self {
        Self {
            func: Arc::new(func),
        }
    }
}

#[async_trait]
impl<F> ComputeCapability for BlockingCompute<F>
where
    F: Fn(&Namespace, &FilterSet) -> ComputeOutcome + Send + Sync + 'static,
{
    async fn compute(&self, namespace: &Namespace, filters: &FilterSet) -> ComputeOutcome {
        let func = self.func.clone();
        let namespace = namespace.clone();
        let filters = filters.clone();
        tokio::task::spawn_blocking(move || func(&namespace, &filters))
            .await
            .unwrap_or_else(|e| Err(ComputeError::permanent(format!("compute task aborted: {e}"))))
    }
}
