//! In-process keyed locks serialising read-validate-write sequences
use std::collections::HashSet;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
pub struct KeyedLocks {
    held: Mutex<HashSet<String>>,
    released: Condvar,
}

/// Held for the duration of one operation on the keyed row.
#[must_use]
pub struct KeyGuard<'a> {
    locks: &'a KeyedLocks,
    key: String,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    // the set only tracks membership, so a poisoned mutex is still consistent
    fn held(&self) -> MutexGuard<'_, HashSet<String>> {
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Blocks until no other guard holds `key`.
    pub fn lock(&self, key: String) -> KeyGuard<'_> {
        let mut held = self.held();
        while held.contains(&key) {
            held = self
                .released
                .wait(held)
                .unwrap_or_else(PoisonError::into_inner);
        }
        held.insert(key.clone());
        KeyGuard { locks: self, key }
    }

    pub fn submission(&self, id: &str) -> KeyGuard<'_> {
        self.lock(format!("submission:{id}"))
    }

    pub fn budget(&self, id: &str) -> KeyGuard<'_> {
        self.lock(format!("budget:{id}"))
    }
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        self.locks.held().remove(&self.key);
        self.locks.released.notify_all();
    }
}
