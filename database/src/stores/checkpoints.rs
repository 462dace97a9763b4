use super::{decode, encode};
use crate::{db::ChainDb, errors::StoreResult, index::root_key, key::DbKey, registry::Bucket, types::Checkpoint};
use std::sync::Arc;

const JUSTIFIED_KEY: &[u8] = b"justified";
const FINALIZED_KEY: &[u8] = b"finalized";

#[derive(Clone)]
pub struct DbCheckpointStore {
    db: Arc<ChainDb>,
}

impl DbCheckpointStore {
    pub fn new(db: Arc<ChainDb>) -> Self {
        Self { db }
    }

    fn read(&self, key: &[u8]) -> StoreResult<Checkpoint> {
        decode(&self.db.run_read_txn(|txn| txn.read(&DbKey::new(Bucket::Checkpoints, key)))?)
    }

    pub fn save_justified_checkpoint(&self, checkpoint: Checkpoint) -> StoreResult<()> {
        self.db.run_write_txn(|txn| {
            txn.put(DbKey::new(Bucket::Checkpoints, JUSTIFIED_KEY), encode(&checkpoint)?);
            Ok(())
        })
    }

    pub fn justified_checkpoint(&self) -> StoreResult<Checkpoint> {
        self.read(JUSTIFIED_KEY)
    }

    /// Saves the finalized checkpoint and records its root as a finalized block, atomically
    pub fn save_finalized_checkpoint(&self, checkpoint: Checkpoint) -> StoreResult<()> {
        self.db.run_write_txn(|txn| {
            txn.put(DbKey::new(Bucket::Checkpoints, FINALIZED_KEY), encode(&checkpoint)?);
            txn.put(root_key(Bucket::FinalizedBlockRootsIndex, &checkpoint.root), Vec::new());
            Ok(())
        })
    }

    pub fn finalized_checkpoint(&self) -> StoreResult<Checkpoint> {
        self.read(FINALIZED_KEY)
    }
}
