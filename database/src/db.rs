use crate::{
    errors::StoreResult,
    lockfile::Lockfile,
    txn::{ReadTxn, TxnStats, TxnStatsSnapshot, WriteTxn},
};
use beacon_utils::fd_budget::FDGuard;
use log::info;
use parking_lot::Mutex;
use rocksdb::{DBWithThreadMode, MultiThreaded, WriteOptions};
use std::{
    fs,
    path::{Path, PathBuf},
};

pub(crate) use conn_builder::create_private_dir;
pub use conn_builder::{ConnBuilder, DEFAULT_LOCK_TIMEOUT};

mod conn_builder;

/// The underlying RocksDB handle type
pub type DB = DBWithThreadMode<MultiThreaded>;

/// Name of the advisory lock file inside the data directory
pub const LOCK_FILE_NAME: &str = "store.lock";

/// The transactional key-value engine: a single writer and any number of snapshot readers
/// over one RocksDB instance which this handle exclusively owns.
pub struct ChainDb {
    // Field order matters: RocksDB must be closed before the lock and the descriptor budget are released
    inner: DB,
    path: PathBuf,
    write_lock: Mutex<()>,
    sync_writes: bool,
    stats: TxnStats,
    _fd_guard: FDGuard,
    _lock: Lockfile,
}

impl ChainDb {
    pub(crate) fn new(inner: DB, path: PathBuf, sync_writes: bool, fd_guard: FDGuard, lock: Lockfile) -> Self {
        Self { inner, path, write_lock: Mutex::new(()), sync_writes, stats: TxnStats::default(), _fd_guard: fd_guard, _lock: lock }
    }

    /// Runs `op` against a consistent snapshot. Read transactions never block each other or the writer.
    pub fn run_read_txn<T>(&self, op: impl FnOnce(&ReadTxn<'_>) -> StoreResult<T>) -> StoreResult<T> {
        self.stats.on_read();
        let txn = ReadTxn::new(&self.inner);
        op(&txn)
    }

    /// Runs `op` as the single active write transaction. Its mutations are committed atomically
    /// iff `op` returns `Ok`; an error or a panic inside `op` discards all of them.
    pub fn run_write_txn<T>(&self, op: impl FnOnce(&mut WriteTxn<'_>) -> StoreResult<T>) -> StoreResult<T> {
        let _guard = self.write_lock.lock();
        self.stats.on_write();
        let mut txn = WriteTxn::new(&self.inner, &self.stats);
        let value = op(&mut txn)?;
        txn.commit(&self.write_options())?;
        Ok(value)
    }

    fn write_options(&self) -> WriteOptions {
        let mut opts = WriteOptions::default();
        opts.set_sync(self.sync_writes);
        opts
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn stats(&self) -> TxnStatsSnapshot {
        self.stats.snapshot()
    }

    /// Flushes the memtables to disk
    pub fn flush(&self) -> StoreResult<()> {
        Ok(self.inner.flush()?)
    }

    /// Reads an integer RocksDB property such as `rocksdb.estimate-num-keys`
    pub fn property_int_value(&self, name: &str) -> StoreResult<Option<u64>> {
        Ok(self.inner.property_int_value(name)?)
    }
}

impl Drop for ChainDb {
    fn drop(&mut self) {
        info!("closing database at {}", self.path.display());
    }
}

/// Deletes an existing database directory if it exists
pub fn delete_db(db_dir: &Path) -> StoreResult<()> {
    if !db_dir.exists() {
        return Ok(());
    }
    DB::destroy(&rocksdb::Options::default(), db_dir)?;
    // Files RocksDB does not own (the lock file) survive `destroy`
    if db_dir.exists() {
        fs::remove_dir_all(db_dir)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{errors::StoreError, key::DbKey, registry::Bucket};
    use std::{sync::Arc, thread, time::Duration};

    fn open_temp() -> (tempfile::TempDir, Arc<ChainDb>) {
        let dir = tempfile::tempdir().unwrap();
        let db = ConnBuilder::default().with_db_path(dir.path().join("test.db")).with_files_limit(10).build().unwrap();
        (dir, db)
    }

    #[test]
    fn test_write_then_read() {
        let (_dir, db) = open_temp();
        let key = DbKey::new(Bucket::Blocks, [1u8; 32]);
        db.run_write_txn(|txn| {
            txn.put(key.clone(), b"payload".to_vec());
            assert_eq!(txn.get(&key)?, Some(b"payload".to_vec()));
            Ok(())
        })
        .unwrap();
        let value = db.run_read_txn(|txn| txn.get(&key)).unwrap();
        assert_eq!(value, Some(b"payload".to_vec()));
        assert_eq!(db.stats().commits, 1);
    }

    #[test]
    fn test_error_rolls_back() {
        let (_dir, db) = open_temp();
        let key = DbKey::new(Bucket::Blocks, [2u8; 32]);
        let result: StoreResult<()> = db.run_write_txn(|txn| {
            txn.put(key.clone(), vec![1, 2, 3]);
            Err(StoreError::DataInconsistency("abort".into()))
        });
        assert!(result.is_err());
        assert!(!db.run_read_txn(|txn| txn.has(&key)).unwrap());
        assert_eq!(db.stats().rollbacks, 1);
        assert_eq!(db.stats().commits, 0);
    }

    #[test]
    fn test_panic_rolls_back_and_releases_writer() {
        let (_dir, db) = open_temp();
        let key = DbKey::new(Bucket::States, [3u8; 32]);
        let panicking = {
            let db = db.clone();
            let key = key.clone();
            thread::spawn(move || {
                let _ = db.run_write_txn(|txn| -> StoreResult<()> {
                    txn.put(key, vec![9]);
                    panic!("writer crashed");
                });
            })
        };
        assert!(panicking.join().is_err());
        assert!(!db.run_read_txn(|txn| txn.has(&key)).unwrap());

        // The writer lock must be free again
        db.run_write_txn(|txn| {
            txn.put(key.clone(), vec![10]);
            Ok(())
        })
        .unwrap();
        assert_eq!(db.run_read_txn(|txn| txn.get(&key)).unwrap(), Some(vec![10]));
    }

    #[test]
    fn test_commit_hooks_run_only_on_commit() {
        let (_dir, db) = open_temp();
        let fired = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let _ = db.run_write_txn(|txn| -> StoreResult<()> {
            let fired = fired.clone();
            txn.on_commit(move || fired.lock().push("rolled-back"));
            Err(StoreError::DataInconsistency("abort".into()))
        });
        db.run_write_txn(|txn| {
            let fired = fired.clone();
            txn.on_commit(move || fired.lock().push("committed"));
            Ok(())
        })
        .unwrap();
        assert_eq!(*fired.lock(), vec!["committed"]);
    }

    #[test]
    fn test_reader_sees_snapshot() {
        let (_dir, db) = open_temp();
        let key = DbKey::new(Bucket::Blocks, [4u8; 32]);
        db.run_write_txn(|txn| {
            txn.put(key.clone(), vec![1]);
            Ok(())
        })
        .unwrap();
        db.run_read_txn(|read| {
            db.run_write_txn(|txn| {
                txn.put(key.clone(), vec![2]);
                Ok(())
            })?;
            // The snapshot predates the second commit
            assert_eq!(read.get(&key)?, Some(vec![1]));
            Ok(())
        })
        .unwrap();
        assert_eq!(db.run_read_txn(|txn| txn.get(&key)).unwrap(), Some(vec![2]));
    }

    #[test]
    fn test_range_iter_is_inclusive_and_ordered() {
        let (_dir, db) = open_temp();
        db.run_write_txn(|txn| {
            for slot in [1u64, 5, 7, 256, 1000] {
                txn.put(DbKey::new(Bucket::BlockSlotIndices, slot.to_be_bytes()), vec![slot as u8]);
            }
            txn.put(DbKey::new(Bucket::Blocks, 5u64.to_be_bytes()), vec![0]);
            Ok(())
        })
        .unwrap();
        let slots: Vec<u64> = db
            .run_read_txn(|txn| {
                let from = DbKey::new(Bucket::BlockSlotIndices, 5u64.to_be_bytes());
                let to = DbKey::new(Bucket::BlockSlotIndices, 256u64.to_be_bytes());
                txn.range_iter(&from, &to)
                    .map(|item| item.map(|(key, _)| u64::from_be_bytes(key.as_ref().try_into().unwrap())))
                    .collect()
            })
            .unwrap();
        assert_eq!(slots, vec![5, 7, 256]);
    }

    #[test]
    fn test_second_open_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        let _db = ConnBuilder::default().with_db_path(path.clone()).with_files_limit(10).build().unwrap();
        let err = ConnBuilder::default()
            .with_db_path(path)
            .with_files_limit(10)
            .with_lock_timeout(Duration::from_millis(100))
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, StoreError::LockTimeout { .. }));
    }

    #[test]
    fn test_delete_db() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        delete_db(&path).unwrap();
        let db = ConnBuilder::default().with_db_path(path.clone()).with_files_limit(10).build().unwrap();
        drop(db);
        assert!(path.exists());
        delete_db(&path).unwrap();
        assert!(!path.exists());
        assert!(dir.path().exists());
    }

    #[test]
    fn test_missing_db_without_create() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.db");
        let err = ConnBuilder::default()
            .with_db_path(path.clone())
            .with_files_limit(10)
            .with_create_if_missing(false)
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, StoreError::Configuration { .. }), "{err}");
        assert!(!path.exists());
    }
}
