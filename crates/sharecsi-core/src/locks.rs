use crate::error::{CsiError, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

/// Per-key mutual exclusion for volume, share and snapshot names.
///
/// Entries exist only while some task holds or waits for the key; the last
/// one out removes it. Cloning shares the same table.
#[derive(Clone, Default)]
pub struct LockTable {
    entries: Arc<Mutex<HashMap<String, LockEntry>>>,
}

struct LockEntry {
    mutex: Arc<AsyncMutex<()>>,
    /// Holders plus waiters
    refs: usize,
}

/// Held lock; released on drop
pub struct LockGuard {
    key: String,
    // field order matters: the mutex is released before the entry is unreferenced
    _held: OwnedMutexGuard<()>,
    _ticket: Ticket,
}

impl LockGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard").field("key", &self.key).finish()
    }
}

/// Keeps a table entry alive while a task waits for or holds its mutex
struct Ticket {
    entries: Arc<Mutex<HashMap<String, LockEntry>>>,
    key: String,
}

impl Drop for Ticket {
    fn drop(&mut self) {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(&self.key) {
            entry.refs -= 1;
            if entry.refs == 0 {
                entries.remove(&self.key);
            }
        }
    }
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn checkout(&self, key: &str) -> (Arc<AsyncMutex<()>>, Ticket) {
        let mut entries = self.entries.lock();
        let entry = entries.entry(key.to_string()).or_insert_with(|| LockEntry {
            mutex: Arc::new(AsyncMutex::new(())),
            refs: 0,
        });
        entry.refs += 1;
        let ticket = Ticket {
            entries: self.entries.clone(),
            key: key.to_string(),
        };
        (entry.mutex.clone(), ticket)
    }

    /// Wait until no other task holds `key`
    pub async fn acquire(&self, key: &str) -> LockGuard {
        let (mutex, ticket) = self.checkout(key);
        let held = mutex.lock_owned().await;
        LockGuard {
            key: key.to_string(),
            _held: held,
            _ticket: ticket,
        }
    }

    /// Wait at most `timeout` for `key`, failing with `Aborted`
    pub async fn acquire_timeout(
        &self,
        key: &str,
        operation: &str,
        timeout: Duration,
    ) -> Result<LockGuard> {
        match tokio::time::timeout(timeout, self.acquire(key)).await {
            Ok(guard) => Ok(guard),
            Err(_) => {
                debug!(key, operation, "Timed out waiting for lock");
                Err(CsiError::aborted(key, operation))
            }
        }
    }

    /// Take `key` only if it is free right now
    pub fn try_acquire(&self, key: &str) -> Option<LockGuard> {
        let (mutex, ticket) = self.checkout(key);
        let held = mutex.try_lock_owned().ok()?;
        Some(LockGuard {
            key: key.to_string(),
            _held: held,
            _ticket: ticket,
        })
    }

    /// Like `try_acquire`, failing with `Aborted`
    pub fn try_acquire_or_abort(&self, key: &str, operation: &str) -> Result<LockGuard> {
        self.try_acquire(key)
            .ok_or_else(|| CsiError::aborted(key, operation))
    }

    /// Number of keys currently held or awaited
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
