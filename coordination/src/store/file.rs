//! JSON file repository
//!
//! Stores one document per scope under a directory. Writes go to a sibling
//! temporary file first and are renamed into place, so a crash mid-write
//! leaves the previous document intact.
//!
//! Updates hold an exclusive advisory lock on `.<scope>.lock` for the whole
//! load-modify-save, so every process sharing the directory (one-shot CLI
//! invocations included) sees a serial history per scope.

use std::fs::OpenOptions;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

use super::{validate_scope, Repository, SharedRepository, StoreError, StoreResult, UpdateFn};

const EXTENSION: &str = "json";
const LOCK_EXTENSION: &str = "lock";

/// Directory-backed repository with one JSON file per scope
#[derive(Debug)]
pub struct JsonFileRepository<T> {
    dir: PathBuf,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonFileRepository<T> {
    /// Open (creating if needed) a repository rooted at `dir`
    pub fn open(dir: impl Into<PathBuf>) -> StoreResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            _marker: PhantomData,
        })
    }

    /// Root directory of this repository
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, scope: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", scope, EXTENSION))
    }

    fn lock_path_for(&self, scope: &str) -> PathBuf {
        self.dir.join(format!(".{}.{}", scope, LOCK_EXTENSION))
    }
}

impl<T> JsonFileRepository<T>
where
    T: Serialize + DeserializeOwned + 'static,
{
    /// Create a shared reference to this repository
    pub fn shared(self) -> SharedRepository<T> {
        Arc::new(self)
    }
}

impl<T> Repository<T> for JsonFileRepository<T>
where
    T: Serialize + DeserializeOwned,
{
    fn load(&self, scope: &str) -> StoreResult<Option<T>> {
        validate_scope(scope)?;
        let path = self.path_for(scope);
        if !path.exists() {
            return Ok(None);
        }

        let json = std::fs::read_to_string(&path)?;
        let value = serde_json::from_str(&json)
            .map_err(|e| StoreError::Deserialization(format!("{}: {}", path.display(), e)))?;
        Ok(Some(value))
    }

    fn save(&self, scope: &str, value: &T) -> StoreResult<()> {
        validate_scope(scope)?;
        let path = self.path_for(scope);
        let json = serde_json::to_string_pretty(value)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let tmp = self
            .dir
            .join(format!(".{}.{}.tmp", scope, uuid::Uuid::new_v4().simple()));
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &path)?;

        debug!(path = %path.display(), "State saved");
        Ok(())
    }

    fn update(&self, scope: &str, apply: &mut UpdateFn<'_, T>) -> StoreResult<()> {
        validate_scope(scope)?;
        let lock_path = self.lock_path_for(scope);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)?;
        let mut lock = fd_lock::RwLock::new(file);
        let _held = lock.write()?;

        let current = self.load(scope)?;
        if let Some(next) = apply(current)? {
            self.save(scope, &next)?;
        }
        Ok(())
    }

    fn retire(&self, scope: &str) -> StoreResult<()> {
        validate_scope(scope)?;
        match std::fs::remove_file(self.lock_path_for(scope)) {
            Ok(()) => {
                debug!(scope, "Scope lock retired");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn scopes(&self) -> StoreResult<Vec<String>> {
        let mut scopes = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if validate_scope(stem).is_ok() {
                    scopes.push(stem.to_string());
                }
            }
        }
        scopes.sort();
        Ok(scopes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Doc {
        name: String,
        count: u32,
    }

    #[test]
    fn test_round_trip_and_scopes() {
        let temp = tempfile::TempDir::new().unwrap();
        let repo = JsonFileRepository::<Doc>::open(temp.path().join("docs")).unwrap();

        assert_eq!(repo.load("first").unwrap(), None);

        let doc = Doc {
            name: "queue".into(),
            count: 3,
        };
        repo.save("first", &doc).unwrap();
        repo.save("second", &doc).unwrap();

        assert_eq!(repo.load("first").unwrap(), Some(doc));
        assert_eq!(
            repo.scopes().unwrap(),
            vec!["first".to_string(), "second".to_string()]
        );
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let temp = tempfile::TempDir::new().unwrap();
        let repo = JsonFileRepository::<u32>::open(temp.path()).unwrap();
        repo.save("lock", &7).unwrap();

        let names: Vec<String> = std::fs::read_dir(temp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["lock.json".to_string()]);
    }

    #[test]
    fn test_corrupt_document_reports_deserialization() {
        let temp = tempfile::TempDir::new().unwrap();
        std::fs::write(temp.path().join("bad.json"), "{ not json").unwrap();
        let repo = JsonFileRepository::<Doc>::open(temp.path()).unwrap();
        assert!(matches!(
            repo.load("bad"),
            Err(StoreError::Deserialization(_))
        ));
    }

    #[test]
    fn test_concurrent_updates_across_handles_are_serial() {
        let temp = tempfile::TempDir::new().unwrap();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let dir = temp.path().to_path_buf();
                std::thread::spawn(move || {
                    // A separate handle per thread, as separate processes would have
                    let repo = JsonFileRepository::<u32>::open(dir).unwrap();
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

        let repo = JsonFileRepository::<u32>::open(temp.path()).unwrap();
        assert_eq!(repo.load("counter").unwrap(), Some(100));
        assert_eq!(repo.scopes().unwrap(), vec!["counter".to_string()]);
    }

    #[test]
    fn test_retire_removes_lock_file() {
        let temp = tempfile::TempDir::new().unwrap();
        let repo = JsonFileRepository::<u32>::open(temp.path()).unwrap();
        repo.update("vote", &mut |_: Option<u32>| -> StoreResult<Option<u32>> { Ok(Some(1)) })
            .unwrap();
        assert!(temp.path().join(".vote.lock").exists());

        repo.retire("vote").unwrap();
        repo.retire("vote").unwrap();
        assert!(!temp.path().join(".vote.lock").exists());
        assert_eq!(repo.load("vote").unwrap(), Some(1));
    }

    #[test]
    fn test_rejects_path_traversal() {
        let temp = tempfile::TempDir::new().unwrap();
        let repo = JsonFileRepository::<u32>::open(temp.path()).unwrap();
        assert!(matches!(
            repo.save("../escape", &1),
            Err(StoreError::InvalidScope(_))
        ));
    }
}
