//! State persistence for the coordination core
//!
//! Each shared resource (the task queue, the scheduler's agent table, the
//! write lock, and every council vote) is persisted through a
//! [`Repository`] keyed by a *scope* string. The core never touches files or
//! databases directly, so backends are interchangeable:
//!
//! - [`MemoryRepository`]: process-local map, used in tests and one-shot runs
//! - [`JsonFileRepository`]: one pretty-printed JSON document per scope
//! - `RocksStateStore` (feature `heavy-state`): RocksDB column families
//!
//! # Usage
//!
//! ```ignore
//! use priority_coordination::store::{JsonFileRepository, Repository};
//!
//! let votes = JsonFileRepository::<VoteRecord>::open("./state/votes")?;
//! votes.save("VOTE-1A2B3C4D", &record)?;
//! let loaded = votes.load("VOTE-1A2B3C4D")?;
//! ```
//!
//! Atomicity of `save` is the backend's contract: a reader must observe
//! either the previous or the new document, never a torn write.
//!
//! Services never pair a `load` with a later `save`. Every read-modify-write
//! goes through [`Repository::update`], which serializes writers of one scope
//! across handles and, for the JSON backend, across processes sharing the
//! state directory:
//!
//! ```ignore
//! let depth = queue_repo.modify("default", |slot| {
//!     let queue = slot.get_or_insert_with(PriorityQueue::default);
//!     queue.add_item(item);
//!     Ok::<_, StoreError>(queue.depth())
//! })?;
//! ```

pub mod file;
pub mod memory;
#[cfg(feature = "heavy-state")]
pub mod rocks;
pub mod schema;
mod scope_lock;

use std::sync::Arc;

pub use file::JsonFileRepository;
pub use memory::MemoryRepository;
#[cfg(feature = "heavy-state")]
pub use rocks::{RocksRepository, RocksStateStore};
pub(crate) use scope_lock::ScopeLocks;

/// Error type for state store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[cfg(feature = "heavy-state")]
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Invalid scope name: {0:?}")]
    InvalidScope(String),

    #[error("Lock poisoned")]
    LockPoisoned,

    #[error("Column family not found: {0}")]
    ColumnFamilyNotFound(String),

    #[error("Update of scope {0:?} did not run")]
    UpdateNotApplied(String),
}

/// Result type for state store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// One read-modify-write step: receives the stored state and returns the
/// state to write back, or `None` to leave storage untouched
pub type UpdateFn<'a, T> = dyn FnMut(Option<T>) -> StoreResult<Option<T>> + 'a;

/// Load/save contract for one resource kind
pub trait Repository<T>: Send + Sync {
    /// Load the state stored under `scope`, if any
    fn load(&self, scope: &str) -> StoreResult<Option<T>>;

    /// Replace the state stored under `scope`
    fn save(&self, scope: &str, value: &T) -> StoreResult<()>;

    /// Load, transform and store `scope` as one exclusive step.
    ///
    /// No other `update` of the same scope interleaves with this one, whether
    /// it runs on this handle, another handle over the same storage, or (for
    /// the JSON backend) another process. `apply` must not update the same
    /// scope again.
    fn update(&self, scope: &str, apply: &mut UpdateFn<'_, T>) -> StoreResult<()>;

    /// The state under `scope` is final and will not be updated again;
    /// backends may drop whatever they keep to serialize its writers
    fn retire(&self, _scope: &str) -> StoreResult<()> {
        Ok(())
    }

    /// All scopes that currently hold state, sorted
    fn scopes(&self) -> StoreResult<Vec<String>>;
}

/// Shared handle to a repository
pub type SharedRepository<T> = Arc<dyn Repository<T>>;

impl<T> dyn Repository<T> + '_ {
    /// Typed critical section over [`Repository::update`].
    ///
    /// `f` edits the stored state in place (`None` when nothing is stored).
    /// The result is written back only if `f` succeeds and the state changed;
    /// an error from `f` leaves storage untouched and is returned as is.
    pub fn modify<R, E>(
        &self,
        scope: &str,
        f: impl FnOnce(&mut Option<T>) -> Result<R, E>,
    ) -> Result<R, E>
    where
        T: Clone + PartialEq,
        E: From<StoreError>,
    {
        let mut f = Some(f);
        let mut outcome: Option<Result<R, E>> = None;

        self.update(scope, &mut |current: Option<T>| -> StoreResult<Option<T>> {
            let Some(f) = f.take() else {
                return Ok(None);
            };
            let mut state = current.clone();
            match f(&mut state) {
                Ok(value) => {
                    outcome = Some(Ok(value));
                    Ok(if state != current { state } else { None })
                }
                Err(e) => {
                    outcome = Some(Err(e));
                    Ok(None)
                }
            }
        })
        .map_err(E::from)?;

        outcome.unwrap_or_else(|| Err(StoreError::UpdateNotApplied(scope.to_string()).into()))
    }

    /// [`modify`](Self::modify) starting from `T::default()` when nothing is
    /// stored yet; an untouched default is not written
    pub fn modify_or_default<R, E>(
        &self,
        scope: &str,
        f: impl FnOnce(&mut T) -> Result<R, E>,
    ) -> Result<R, E>
    where
        T: Clone + PartialEq + Default,
        E: From<StoreError>,
    {
        self.modify(scope, |slot: &mut Option<T>| -> Result<R, E> {
            let mut state = slot.clone().unwrap_or_default();
            let out = f(&mut state)?;
            if slot.is_some() || state != T::default() {
                *slot = Some(state);
            }
            Ok(out)
        })
    }
}

/// Reject scope names that could escape a storage namespace.
///
/// Scopes become file names and key suffixes, so only ASCII alphanumerics,
/// `-`, `_` and `.` are accepted, and the name may not start with a dot.
pub(crate) fn validate_scope(scope: &str) -> StoreResult<()> {
    let valid = !scope.is_empty()
        && !scope.starts_with('.')
        && scope
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidScope(scope.to_string()))
    }
}
