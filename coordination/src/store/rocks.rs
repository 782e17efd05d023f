//! RocksDB-backed repositories
//!
//! One database instance is shared by all resource kinds; each kind lives in
//! its own column family (see [`super::schema`]). Values are stored as JSON
//! so the on-disk format matches the file backend.
//!
//! RocksDB admits one process per database, so updates only need to be
//! serialized inside this process: each `(column family, scope)` pair has its
//! own exclusive slot, held across the read and the write. The queue and the
//! scheduler are updated in a nested fashion, so one database-wide write guard
//! would deadlock against itself.

use std::marker::PhantomData;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use rocksdb::{ColumnFamilyDescriptor, IteratorMode, Options, DB};
use serde::{de::DeserializeOwned, Serialize};

use super::schema::ALL_CFS;
use super::{validate_scope, Repository, ScopeLocks, SharedRepository, StoreError, StoreResult, UpdateFn};

/// Shared RocksDB instance holding every coordination namespace
#[derive(Clone)]
pub struct RocksStateStore {
    db: Arc<RwLock<DB>>,
    scope_locks: Arc<ScopeLocks>,
    path: PathBuf,
}

impl RocksStateStore {
    /// Open or create a state store at the given path
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&opts, &path, cf_descriptors)?;

        Ok(Self {
            db: Arc::new(RwLock::new(db)),
            scope_locks: Arc::new(ScopeLocks::default()),
            path,
        })
    }

    /// Get the database path
    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Repository view over one column family
    pub fn repository<T>(&self, cf_name: &'static str) -> RocksRepository<T> {
        RocksRepository {
            db: Arc::clone(&self.db),
            scope_locks: Arc::clone(&self.scope_locks),
            cf_name,
            _marker: PhantomData,
        }
    }

    /// Shared repository view over one column family
    pub fn shared_repository<T>(&self, cf_name: &'static str) -> SharedRepository<T>
    where
        T: Serialize + DeserializeOwned + 'static,
    {
        Arc::new(self.repository(cf_name))
    }
}

/// Typed view over a single column family
pub struct RocksRepository<T> {
    db: Arc<RwLock<DB>>,
    scope_locks: Arc<ScopeLocks>,
    cf_name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Repository<T> for RocksRepository<T>
where
    T: Serialize + DeserializeOwned,
{
    fn load(&self, scope: &str) -> StoreResult<Option<T>> {
        validate_scope(scope)?;
        let db = self.db.read().map_err(|_| StoreError::LockPoisoned)?;
        let cf = db
            .cf_handle(self.cf_name)
            .ok_or_else(|| StoreError::ColumnFamilyNotFound(self.cf_name.to_string()))?;

        match db.get_cf(cf, scope.as_bytes())? {
            Some(bytes) => {
                let value = serde_json::from_slice(&bytes)
                    .map_err(|e| StoreError::Deserialization(e.to_string()))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn save(&self, scope: &str, value: &T) -> StoreResult<()> {
        validate_scope(scope)?;
        let db = self.db.read().map_err(|_| StoreError::LockPoisoned)?;
        let cf = db
            .cf_handle(self.cf_name)
            .ok_or_else(|| StoreError::ColumnFamilyNotFound(self.cf_name.to_string()))?;

        let bytes =
            serde_json::to_vec(value).map_err(|e| StoreError::Serialization(e.to_string()))?;
        db.put_cf(cf, scope.as_bytes(), bytes)?;
        Ok(())
    }

    fn update(&self, scope: &str, apply: &mut UpdateFn<'_, T>) -> StoreResult<()> {
        validate_scope(scope)?;
        let _held = self
            .scope_locks
            .acquire(&format!("{}/{}", self.cf_name, scope))?;

        let current = self.load(scope)?;
        if let Some(next) = apply(current)? {
            self.save(scope, &next)?;
        }
        Ok(())
    }

    fn scopes(&self) -> StoreResult<Vec<String>> {
        let db = self.db.read().map_err(|_| StoreError::LockPoisoned)?;
        let cf = db
            .cf_handle(self.cf_name)
            .ok_or_else(|| StoreError::ColumnFamilyNotFound(self.cf_name.to_string()))?;

        let mut scopes = Vec::new();
        for item in db.iterator_cf(cf, IteratorMode::Start) {
            let (key, _) = item?;
            if let Ok(key_str) = String::from_utf8(key.to_vec()) {
                scopes.push(key_str);
            }
        }
        Ok(scopes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::schema::{CF_LOCKS, CF_VOTES};

    fn test_store() -> (RocksStateStore, tempfile::TempDir) {
        let temp = tempfile::TempDir::new().unwrap();
        let store = RocksStateStore::open(temp.path().join("db")).unwrap();
        (store, temp)
    }

    #[test]
    fn test_column_families_are_isolated() {
        let (store, _temp) = test_store();
        let votes = store.repository::<String>(CF_VOTES);
        let locks = store.repository::<String>(CF_LOCKS);

        votes.save("shared-scope", &"vote".to_string()).unwrap();
        assert_eq!(locks.load("shared-scope").unwrap(), None);
        assert_eq!(
            votes.load("shared-scope").unwrap(),
            Some("vote".to_string())
        );
        assert_eq!(votes.scopes().unwrap(), vec!["shared-scope".to_string()]);
    }

    #[test]
    fn test_concurrent_updates_are_serial() {
        let (store, _temp) = test_store();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let repo = store.shared_repository::<u32>(CF_LOCKS);
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        repo.update("counter", &mut |n: Option<u32>| -> StoreResult<Option<u32>> {
                            Ok(Some(n.unwrap_or(0) + 1))
                        })
                        .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(
            store.repository::<u32>(CF_LOCKS).load("counter").unwrap(),
            Some(100)
        );
    }
}
