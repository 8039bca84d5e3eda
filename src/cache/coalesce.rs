//! Per-key single-flight locking.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use tokio::sync::{Mutex, OwnedMutexGuard};

/// Serializes work on identical keys: the first caller computes, later
/// callers wait and then usually find the result cached.
#[derive(Debug, Default)]
pub struct Coalescer {
    inflight: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Coalescer {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, key: &str) -> InflightGuard<'_> {
        let lock = {
            let mut inflight = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(
                inflight
                    .entry(key.to_string())
                    .or_insert_with(|| Arc::new(Mutex::new(()))),
            )
        };
        let guard = Arc::clone(&lock).lock_owned().await;
        InflightGuard {
            owner: self,
            key: key.to_string(),
            lock,
            _guard: guard,
        }
    }

    /// Keys currently locked or awaited.
    pub fn inflight_count(&self) -> usize {
        self.inflight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Held while a key is being computed. Dropping it releases waiters and
/// forgets the key once nobody else is queued on it.
pub struct InflightGuard<'a> {
    owner: &'a Coalescer,
    key: String,
    lock: Arc<Mutex<()>>,
    _guard: OwnedMutexGuard<()>,
}

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        let mut inflight = self
            .owner
            .inflight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // map + this guard's `lock` + the owned mutex guard
        if Arc::strong_count(&self.lock) <= 3 {
            inflight.remove(&self.key);
        }
    }
}
