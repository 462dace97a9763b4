use crate::{
    db::DB,
    errors::{StoreError, StoreResult},
    key::DbKey,
};
use log::trace;
use rocksdb::{Direction, IteratorMode, ReadOptions, SnapshotWithThreadMode, WriteBatch, WriteOptions};
use std::{
    collections::HashMap,
    sync::atomic::{AtomicU64, Ordering},
};

/// Operational counters of the transactional engine
#[derive(Debug, Default)]
pub struct TxnStats {
    read_txns: AtomicU64,
    write_txns: AtomicU64,
    commits: AtomicU64,
    rollbacks: AtomicU64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TxnStatsSnapshot {
    pub read_txns: u64,
    pub write_txns: u64,
    pub commits: u64,
    pub rollbacks: u64,
}

impl TxnStats {
    pub(crate) fn on_read(&self) {
        self.read_txns.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn on_write(&self) {
        self.write_txns.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TxnStatsSnapshot {
        TxnStatsSnapshot {
            read_txns: self.read_txns.load(Ordering::Relaxed),
            write_txns: self.write_txns.load(Ordering::Relaxed),
            commits: self.commits.load(Ordering::Relaxed),
            rollbacks: self.rollbacks.load(Ordering::Relaxed),
        }
    }
}

pub type KeyValue = (Box<[u8]>, Box<[u8]>);

/// A read-only view over a consistent snapshot of the database
pub struct ReadTxn<'a> {
    snapshot: SnapshotWithThreadMode<'a, DB>,
}

impl<'a> ReadTxn<'a> {
    pub(crate) fn new(db: &'a DB) -> Self {
        Self { snapshot: db.snapshot() }
    }

    pub fn get(&self, key: &DbKey) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.snapshot.get(key)?)
    }

    pub fn has(&self, key: &DbKey) -> StoreResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Reads a value which is expected to exist
    pub fn read(&self, key: &DbKey) -> StoreResult<Vec<u8>> {
        self.get(key)?.ok_or_else(|| StoreError::KeyNotFound(key.clone()))
    }

    /// Iterates all entries sharing the prefix of `prefix`, in key order. Yielded keys have the prefix stripped.
    pub fn prefix_iter<'s>(&'s self, prefix: &DbKey) -> impl Iterator<Item = StoreResult<KeyValue>> + use<'s, 'a> {
        self.prefix_iter_directed(prefix, Direction::Forward)
    }

    /// Like [`ReadTxn::prefix_iter`] but from the last key backwards
    pub fn prefix_iter_rev<'s>(&'s self, prefix: &DbKey) -> impl Iterator<Item = StoreResult<KeyValue>> + use<'s, 'a> {
        self.prefix_iter_directed(prefix, Direction::Reverse)
    }

    fn prefix_iter_directed<'s>(
        &'s self,
        prefix: &DbKey,
        direction: Direction,
    ) -> impl Iterator<Item = StoreResult<KeyValue>> + use<'s, 'a> {
        let prefix_len = prefix.as_ref().len();
        let mut read_opts = ReadOptions::default();
        read_opts.set_iterate_range(rocksdb::PrefixRange(prefix.as_ref()));
        let mode = match direction {
            Direction::Forward => IteratorMode::Start,
            Direction::Reverse => IteratorMode::End,
        };
        self.snapshot.iterator_opt(mode, read_opts).map(move |item| strip(item, prefix_len))
    }

    /// Iterates entries with `from <= key <= to` in key order. Both bounds must share one prefix.
    pub fn range_iter<'s>(&'s self, from: &DbKey, to: &DbKey) -> impl Iterator<Item = StoreResult<KeyValue>> + use<'s, 'a> {
        debug_assert_eq!(from.prefix(), to.prefix());
        let prefix_len = from.prefix_len();
        // Appending a zero byte turns the inclusive end into an exclusive bound for keys of equal length
        let mut upper = to.as_ref().to_vec();
        upper.push(0);
        let mut read_opts = ReadOptions::default();
        read_opts.set_iterate_lower_bound(from.as_ref().to_vec());
        read_opts.set_iterate_upper_bound(upper);
        self.snapshot
            .iterator_opt(IteratorMode::From(from.as_ref(), Direction::Forward), read_opts)
            .map(move |item| strip(item, prefix_len))
    }
}

fn strip(item: Result<KeyValue, rocksdb::Error>, prefix_len: usize) -> StoreResult<KeyValue> {
    let (key, value) = item?;
    Ok((key[prefix_len..].into(), value))
}

type CommitHook = Box<dyn FnOnce()>;

/// The single active write transaction. Mutations are buffered and become visible
/// atomically on commit; dropping an uncommitted transaction discards them.
pub struct WriteTxn<'a> {
    db: &'a DB,
    stats: &'a TxnStats,
    batch: WriteBatch,
    // Read-your-writes view of the pending mutations, `None` marks a delete
    pending: HashMap<DbKey, Option<Vec<u8>>>,
    hooks: Vec<CommitHook>,
    committed: bool,
}

impl<'a> WriteTxn<'a> {
    pub(crate) fn new(db: &'a DB, stats: &'a TxnStats) -> Self {
        Self { db, stats, batch: WriteBatch::default(), pending: HashMap::new(), hooks: Vec::new(), committed: false }
    }

    pub fn get(&self, key: &DbKey) -> StoreResult<Option<Vec<u8>>> {
        match self.pending.get(key) {
            Some(value) => Ok(value.clone()),
            None => Ok(self.db.get(key)?),
        }
    }

    pub fn has(&self, key: &DbKey) -> StoreResult<bool> {
        match self.pending.get(key) {
            Some(value) => Ok(value.is_some()),
            None => Ok(self.db.get_pinned(key)?.is_some()),
        }
    }

    pub fn put(&mut self, key: DbKey, value: impl Into<Vec<u8>>) {
        let value = value.into();
        self.batch.put(&key, &value);
        self.pending.insert(key, Some(value));
    }

    pub fn delete(&mut self, key: DbKey) {
        self.batch.delete(&key);
        self.pending.insert(key, None);
    }

    /// Registers `hook` to run once the transaction has been committed. Hooks run in
    /// registration order while the writer lock is still held, and never run on rollback.
    pub fn on_commit(&mut self, hook: impl FnOnce() + 'static) {
        self.hooks.push(Box::new(hook));
    }

    /// Number of buffered mutations
    pub fn len(&self) -> usize {
        self.batch.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }

    pub(crate) fn commit(mut self, write_opts: &WriteOptions) -> StoreResult<()> {
        let batch = std::mem::take(&mut self.batch);
        let ops = batch.len();
        self.db.write_opt(batch, write_opts)?;
        self.committed = true;
        self.stats.commits.fetch_add(1, Ordering::Relaxed);
        trace!("committed write transaction with {ops} operations");
        for hook in std::mem::take(&mut self.hooks) {
            hook();
        }
        Ok(())
    }
}

impl Drop for WriteTxn<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.stats.rollbacks.fetch_add(1, Ordering::Relaxed);
            trace!("rolled back write transaction with {} operations", self.batch.len());
        }
    }
}
