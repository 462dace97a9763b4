use crate::{db::ChainDb, errors::StoreResult, index::root_key, registry::Bucket, types::Root};
use std::sync::Arc;

/// Pool operations stored verbatim by root
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OperationKind {
    ProposerSlashing,
    AttesterSlashing,
    VoluntaryExit,
}

impl OperationKind {
    pub fn bucket(self) -> Bucket {
        match self {
            OperationKind::ProposerSlashing => Bucket::ProposerSlashings,
            OperationKind::AttesterSlashing => Bucket::AttesterSlashings,
            OperationKind::VoluntaryExit => Bucket::VoluntaryExits,
        }
    }
}

#[derive(Clone)]
pub struct DbOperationStore {
    db: Arc<ChainDb>,
}

impl DbOperationStore {
    pub fn new(db: Arc<ChainDb>) -> Self {
        Self { db }
    }

    pub fn save_operation(&self, kind: OperationKind, root: Root, payload: &[u8]) -> StoreResult<()> {
        self.db.run_write_txn(|txn| {
            txn.put(root_key(kind.bucket(), &root), payload);
            Ok(())
        })
    }

    pub fn operation(&self, kind: OperationKind, root: Root) -> StoreResult<Arc<Vec<u8>>> {
        Ok(Arc::new(self.db.run_read_txn(|txn| txn.read(&root_key(kind.bucket(), &root)))?))
    }

    pub fn has_operation(&self, kind: OperationKind, root: Root) -> StoreResult<bool> {
        self.db.run_read_txn(|txn| txn.has(&root_key(kind.bucket(), &root)))
    }

    pub fn delete_operation(&self, kind: OperationKind, root: Root) -> StoreResult<()> {
        self.db.run_write_txn(|txn| {
            txn.delete(root_key(kind.bucket(), &root));
            Ok(())
        })
    }
}
