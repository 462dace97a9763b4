use crate::{
    db::ChainDb,
    errors::StoreResult,
    index::{decode_numeric, numeric_key},
    key::DbKey,
    types::{ArchiveKind, Epoch},
};
use std::sync::Arc;

/// Archived per-epoch summaries, one bucket per [`ArchiveKind`] keyed by big endian epoch
#[derive(Clone)]
pub struct DbArchiveStore {
    db: Arc<ChainDb>,
}

impl DbArchiveStore {
    pub fn new(db: Arc<ChainDb>) -> Self {
        Self { db }
    }

    pub fn save_archived(&self, kind: ArchiveKind, epoch: Epoch, payload: &[u8]) -> StoreResult<()> {
        self.db.run_write_txn(|txn| {
            txn.put(numeric_key(kind.bucket(), epoch), payload);
            Ok(())
        })
    }

    pub fn archived(&self, kind: ArchiveKind, epoch: Epoch) -> StoreResult<Arc<Vec<u8>>> {
        Ok(Arc::new(self.db.run_read_txn(|txn| txn.read(&numeric_key(kind.bucket(), epoch)))?))
    }

    pub fn has_archived(&self, kind: ArchiveKind, epoch: Epoch) -> StoreResult<bool> {
        self.db.run_read_txn(|txn| txn.has(&numeric_key(kind.bucket(), epoch)))
    }

    /// The highest epoch archived for `kind`, if any
    pub fn last_archived_epoch(&self, kind: ArchiveKind) -> StoreResult<Option<Epoch>> {
        self.db.run_read_txn(|txn| match txn.prefix_iter_rev(&DbKey::prefix_only(kind.bucket())).next() {
            Some(item) => Ok(Some(decode_numeric(&item?.0)?)),
            None => Ok(None),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::test_utils::temp_db;

    #[test]
    fn test_last_archived_epoch() {
        let (_lifetime, db) = temp_db();
        let store = DbArchiveStore::new(db);
        assert_eq!(store.last_archived_epoch(ArchiveKind::Balances).unwrap(), None);

        for epoch in [3, 256, 17] {
            store.save_archived(ArchiveKind::Balances, epoch, &epoch.to_le_bytes()).unwrap();
        }
        store.save_archived(ArchiveKind::CommitteeInfo, 1000, b"committees").unwrap();

        assert_eq!(store.last_archived_epoch(ArchiveKind::Balances).unwrap(), Some(256));
        assert_eq!(store.last_archived_epoch(ArchiveKind::CommitteeInfo).unwrap(), Some(1000));
        assert_eq!(store.last_archived_epoch(ArchiveKind::IndexRoots).unwrap(), None);
        assert_eq!(store.archived(ArchiveKind::Balances, 17).unwrap().as_slice(), &17u64.to_le_bytes());
        assert!(!store.has_archived(ArchiveKind::Balances, 18).unwrap());
    }
}
