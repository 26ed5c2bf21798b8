//! Keyed lock table
//!
//! Serializes read-modify-write cycles on the same key inside one process.
//! Entries are created lazily and held only by the guards currently using
//! them; a key with no live guard is pruned on the next acquisition.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Default)]
pub struct KeyedLocks {
    entries: Mutex<HashMap<String, Weak<AsyncMutex<()>>>>,
}

/// Guard for one key; the critical section ends when it is dropped
pub struct KeyGuard {
    _guard: OwnedMutexGuard<()>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until no other guard holds `key`
    pub async fn lock(&self, key: &str) -> KeyGuard {
        let mutex = self.entry(key);
        KeyGuard {
            _guard: mutex.lock_owned().await,
        }
    }

    /// Number of keys with a live guard or waiter
    pub fn len(&self) -> usize {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.values().filter(|weak| weak.strong_count() > 0).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entry(&self, key: &str) -> Arc<AsyncMutex<()>> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.retain(|_, weak| weak.strong_count() > 0);

        if let Some(existing) = entries.get(key).and_then(Weak::upgrade) {
            return existing;
        }

        let mutex = Arc::new(AsyncMutex::new(()));
        entries.insert(key.to_string(), Arc::downgrade(&mutex));
        mutex
    }
}
