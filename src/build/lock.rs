//! Exclusive access to shared build working directories
//!
//! Toolchains write their output to fixed paths inside the working
//! directory, so two pipelines in the same directory would overwrite each
//! other's artifacts. Each key maps to a fair async mutex; waiters are served
//! in arrival order and different keys never contend.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::trace;

type Slot = Arc<AsyncMutex<()>>;

#[derive(Debug, Clone, Default)]
pub struct DirectoryLocks {
    slots: Arc<Mutex<HashMap<String, Slot>>>,
}

/// Held while a pipeline owns its working directory; releases on drop
#[derive(Debug)]
pub struct DirectoryGuard {
    key: String,
    slot: Slot,
    guard: Option<OwnedMutexGuard<()>>,
    slots: Arc<Mutex<HashMap<String, Slot>>>,
}

impl DirectoryGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for DirectoryGuard {
    fn drop(&mut self) {
        self.guard.take();
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        // map entry + this guard's clone; nobody else is waiting
        if Arc::strong_count(&self.slot) == 2 {
            slots.remove(&self.key);
            trace!(key = %self.key, "Pruned idle directory lock");
        }
    }
}

impl DirectoryLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until `key` is free and returns a guard owning it
    pub async fn acquire(&self, key: impl Into<String>) -> DirectoryGuard {
        let key = key.into();
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(slots.entry(key.clone()).or_default())
        };
        trace!(key = %key, "Waiting for directory lock");
        let guard = Arc::clone(&slot).lock_owned().await;
        DirectoryGuard {
            key,
            slot,
            guard: Some(guard),
            slots: Arc::clone(&self.slots),
        }
    }

    /// Runs `work` while holding the lock for `key`
    ///
    /// The lock is released however `work` ends, including by panic.
    pub async fn with_exclusive<F, T>(&self, key: impl Into<String>, work: F) -> T
    where
        F: Future<Output = T>,
    {
        let _guard = self.acquire(key).await;
        work.await
    }

    /// Number of keys currently tracked
    pub fn tracked(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
