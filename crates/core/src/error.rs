use thiserror::Error;

pub type CacheResult<T> = Result<T, CacheError>;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Durable store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Compute failed: {0}")]
    ComputeFailure(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A batched delete stopped part way; `deleted` keys are already gone.
    #[error("Delete stopped after {deleted} keys: {reason}")]
    PartialDelete { deleted: u64, reason: String },

    #[error("Invalidation partially failed: {failed} of {total} patterns")]
    InvalidationPartialFailure { failed: usize, total: usize },
}

impl CacheError {
    /// Keys removed before the error, for errors raised mid-delete.
    pub fn deleted_before_failure(&self) -> u64 {
        match self {
            CacheError::PartialDelete { deleted, .. } => *deleted,
            _ => 0,
        }
    }
}
