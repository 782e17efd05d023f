//! In-process exclusive locks keyed by scope name

use std::collections::BTreeSet;
use std::sync::{Condvar, Mutex, PoisonError};

use super::{StoreError, StoreResult};

/// Set of scopes currently being updated; waiters park on a condvar
#[derive(Debug, Default)]
pub(crate) struct ScopeLocks {
    held: Mutex<BTreeSet<String>>,
    released: Condvar,
}

impl ScopeLocks {
    /// Block until `key` is free, then hold it until the guard drops
    pub(crate) fn acquire(&self, key: &str) -> StoreResult<ScopeGuard<'_>> {
        let mut held = self.held.lock().map_err(|_| StoreError::LockPoisoned)?;
        while held.contains(key) {
            held = self
                .released
                .wait(held)
                .map_err(|_| StoreError::LockPoisoned)?;
        }
        held.insert(key.to_string());
        Ok(ScopeGuard {
            locks: self,
            key: key.to_string(),
        })
    }

    #[cfg(test)]
    fn is_held(&self, key: &str) -> bool {
        self.held
            .lock()
            .map(|held| held.contains(key))
            .unwrap_or(false)
    }
}

/// Holds one scope; releasing wakes every waiter
#[derive(Debug)]
pub(crate) struct ScopeGuard<'a> {
    locks: &'a ScopeLocks,
    key: String,
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        let mut held = self
            .locks
            .held
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        held.remove(&self.key);
        drop(held);
        self.locks.released.notify_all();
    }
}
