use crate::key::DbKey;
use beacon_utils::fd_budget;
use std::{io, path::PathBuf, time::Duration};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("cannot create or access database directory {path}: {source}")]
    Configuration { path: PathBuf, source: io::Error },

    #[error("cannot obtain database lock on {path} within {timeout:?}, database may be in use by another process")]
    LockTimeout { path: PathBuf, timeout: Duration },

    #[error("schema error: {0}")]
    Schema(String),

    #[error("invalid cache configuration: {0}")]
    CacheConstruction(String),

    #[error("key {0} not found in store")]
    KeyNotFound(DbKey),

    #[error("data inconsistency: {0}")]
    DataInconsistency(String),

    #[error("database is closed")]
    Closed,

    #[error("rocksdb error {0}")]
    DbError(#[from] rocksdb::Error),

    #[error("io error {0}")]
    Io(#[from] io::Error),

    #[error("bincode error {0}")]
    DeserializationError(#[from] Box<bincode::ErrorKind>),

    #[error(transparent)]
    FdBudget(#[from] fd_budget::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Predicates that classify store errors into common semantic buckets
pub trait StoreErrorPredicates {
    /// Returns `true` if this error represents a missing entry
    fn is_key_not_found(&self) -> bool;

    /// Returns `true` if this error is a failure to acquire the database lock
    fn is_lock_timeout(&self) -> bool;
}

impl StoreErrorPredicates for StoreError {
    fn is_key_not_found(&self) -> bool {
        matches!(self, StoreError::KeyNotFound(_))
    }

    fn is_lock_timeout(&self) -> bool {
        matches!(self, StoreError::LockTimeout { .. })
    }
}

/// Extension methods for store results.
pub trait StoreResultExt<T, E: StoreErrorPredicates> {
    /// Converts a "key not found" error into absence.
    ///
    /// Mapping:
    /// - `Ok(v)` -> `Ok(Some(v))`
    /// - `Err(e)` where `e.is_key_not_found()` -> `Ok(None)`
    /// - any other `Err(e)` -> `Err(e)`
    fn optional(self) -> Result<Option<T>, E>;
}

impl<T, E: StoreErrorPredicates> StoreResultExt<T, E> for Result<T, E> {
    fn optional(self) -> Result<Option<T>, E> {
        match self {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.is_key_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }
}
