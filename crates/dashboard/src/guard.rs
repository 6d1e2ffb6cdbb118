//! Processing-lock guard. Whoever holds it releases the lock exactly once,
//! explicitly or on drop.

use finboard_cache::{CacheStore, LockToken};
use finboard_core::CacheKey;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

pub struct ProcessingGuard {
    store: Arc<CacheStore>,
    key: CacheKey,
    token: LockToken,
    released: AtomicBool,
}

impl ProcessingGuard {
    /// Wrap a lock that has already been acquired with `token`.
    pub fn new(store: Arc<CacheStore>, key: CacheKey, token: LockToken) -> Self {
        Self {
            store,
            key,
            token,
            released: AtomicBool::new(false),
        }
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    pub async fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        self.store.release_lock(&self.key, &self.token).await;
        debug!(key = %self.key, "Processing lock released");
    }
}

impl Drop for ProcessingGuard {
    fn drop(&mut self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let store = self.store.clone();
                let key = self.key.clone();
                let token = self.token.clone();
                runtime.spawn(async move {
                    store.release_lock(&key, &token).await;
                    debug!(key = %key, "Processing lock released on drop");
                });
            }
            Err(_) => {
                warn!(key = %self.key, "No runtime to release processing lock, relying on lock TTL");
            }
        }
    }
}
