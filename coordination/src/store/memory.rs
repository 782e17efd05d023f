//! In-memory repository

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use super::{
    validate_scope, Repository, ScopeLocks, SharedRepository, StoreError, StoreResult, UpdateFn,
};

/// Process-local repository backed by a map of cloned values
#[derive(Debug)]
pub struct MemoryRepository<T> {
    entries: RwLock<BTreeMap<String, T>>,
    scope_locks: ScopeLocks,
}

impl<T> MemoryRepository<T> {
    /// Create an empty repository
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            scope_locks: ScopeLocks::default(),
        }
    }

    /// Number of stored scopes
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    /// Whether nothing has been saved yet
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone + Send + Sync + 'static> MemoryRepository<T> {
    /// Create a shared reference to an empty repository
    pub fn shared() -> SharedRepository<T> {
        Arc::new(Self::new())
    }
}

impl<T> Default for MemoryRepository<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + Sync> Repository<T> for MemoryRepository<T> {
    fn load(&self, scope: &str) -> StoreResult<Option<T>> {
        validate_scope(scope)?;
        let entries = self.entries.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(entries.get(scope).cloned())
    }

    fn save(&self, scope: &str, value: &T) -> StoreResult<()> {
        validate_scope(scope)?;
        let mut entries = self.entries.write().map_err(|_| StoreError::LockPoisoned)?;
        entries.insert(scope.to_string(), value.clone());
        Ok(())
    }

    fn update(&self, scope: &str, apply: &mut UpdateFn<'_, T>) -> StoreResult<()> {
        validate_scope(scope)?;
        let _held = self.scope_locks.acquire(scope)?;
        if let Some(next) = apply(self.load(scope)?)? {
            self.save(scope, &next)?;
        }
        Ok(())
    }

    fn scopes(&self) -> StoreResult<Vec<String>> {
        let entries = self.entries.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(entries.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_missing_scope() {
        let repo: MemoryRepository<u32> = MemoryRepository::new();
        assert_eq!(repo.load("missing").unwrap(), None);
        assert!(repo.is_empty());
    }

    #[test]
    fn test_save_overwrites() {
        let repo = MemoryRepository::new();
        repo.save("queue", &1u32).unwrap();
        repo.save("queue", &2u32).unwrap();
        assert_eq!(repo.load("queue").unwrap(), Some(2));
        assert_eq!(repo.len(), 1);
    }

    #[test]
    fn test_scopes_sorted() {
        let repo = MemoryRepository::new();
        repo.save("b", &1u32).unwrap();
        repo.save("a", &2u32).unwrap();
        assert_eq!(repo.scopes().unwrap(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_update_skips_write_on_none() {
        let repo = MemoryRepository::new();
        repo.update("queue", &mut |current: Option<u32>| -> StoreResult<Option<u32>> {
            assert_eq!(current, None);
            Ok(None)
        })
        .unwrap();
        assert!(repo.is_empty());

        repo.update("queue", &mut |_: Option<u32>| -> StoreResult<Option<u32>> { Ok(Some(4)) })
            .unwrap();
        assert_eq!(repo.load("queue").unwrap(), Some(4));
    }
}
