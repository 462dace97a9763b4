use super::{decode, encode};
use crate::{
    bitmap::{PresenceIndex, SlotKind},
    cache::Cache,
    db::ChainDb,
    errors::{StoreError, StoreResult},
    index::{self, append_root, intersect, numeric_key, read_roots, remove_root, root_key},
    key::DbKey,
    registry::Bucket,
    txn::{ReadTxn, WriteTxn},
    types::{BlockRecord, Epoch, Root, SLOTS_PER_EPOCH, Slot},
};
use std::sync::Arc;

/// Recently stored or read blocks by root
pub type HotObjectCache = Cache<Root, Arc<BlockRecord>>;

const GENESIS_ROOT_KEY: &[u8] = b"genesis-root";
const HEAD_ROOT_KEY: &[u8] = b"head-root";

/// Constraints of a block query. Unset fields do not constrain; set fields are intersected.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BlockFilter {
    pub start_slot: Option<Slot>,
    pub end_slot: Option<Slot>,
    pub parent_root: Option<Root>,
}

impl BlockFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_start_slot(self, slot: Slot) -> Self {
        Self { start_slot: Some(slot), ..self }
    }

    pub fn with_end_slot(self, slot: Slot) -> Self {
        Self { end_slot: Some(slot), ..self }
    }

    /// Restricts to the slots of epochs `start..=end`
    pub fn with_epoch_range(self, start: Epoch, end: Epoch) -> Self {
        let end_slot = end.saturating_add(1).saturating_mul(SLOTS_PER_EPOCH).saturating_sub(1);
        Self { start_slot: Some(start.saturating_mul(SLOTS_PER_EPOCH)), end_slot: Some(end_slot), ..self }
    }

    pub fn with_parent_root(self, root: Root) -> Self {
        Self { parent_root: Some(root), ..self }
    }

    fn has_slot_range(&self) -> bool {
        self.start_slot.is_some() || self.end_slot.is_some()
    }
}

pub trait BlockStoreReader {
    fn block(&self, root: Root) -> StoreResult<Arc<BlockRecord>>;
    fn has_block(&self, root: Root) -> StoreResult<bool>;
    fn block_roots_at_slot(&self, slot: Slot) -> StoreResult<Vec<Root>>;
    fn block_roots_in_slot_range(&self, start: Slot, end: Slot) -> StoreResult<Vec<Root>>;
    fn block_roots_by_parent(&self, parent_root: Root) -> StoreResult<Vec<Root>>;
    fn blocks(&self, filter: &BlockFilter) -> StoreResult<Vec<Arc<BlockRecord>>>;
    fn highest_slot_block_below(&self, slot: Slot) -> StoreResult<Vec<Arc<BlockRecord>>>;
    fn genesis_block_root(&self) -> StoreResult<Root>;
    fn head_block_root(&self) -> StoreResult<Root>;
    fn is_finalized_block(&self, root: Root) -> StoreResult<bool>;
}

pub trait BlockStore: BlockStoreReader {
    fn save_block(&self, block: Arc<BlockRecord>) -> StoreResult<()>;
    fn save_blocks(&self, blocks: &[Arc<BlockRecord>]) -> StoreResult<()>;
    fn delete_block(&self, root: Root) -> StoreResult<()>;
    fn save_genesis_block_root(&self, root: Root) -> StoreResult<()>;
    fn save_head_block_root(&self, root: Root) -> StoreResult<()>;
    fn save_finalized_block_roots(&self, roots: &[Root]) -> StoreResult<()>;
}

/// A DB + cache implementation of the block stores
#[derive(Clone)]
pub struct DbBlockStore {
    db: Arc<ChainDb>,
    cache: HotObjectCache,
    presence: PresenceIndex,
}

impl DbBlockStore {
    pub fn new(db: Arc<ChainDb>, cache: HotObjectCache, presence: PresenceIndex) -> Self {
        Self { db, cache, presence }
    }

    pub fn cache(&self) -> &HotObjectCache {
        &self.cache
    }

    /// Stages `block` within `txn`: the record, both indices and the presence bit. The cache
    /// is filled only once `txn` commits.
    pub fn save_in_txn(&self, txn: &mut WriteTxn<'_>, block: &Arc<BlockRecord>) -> StoreResult<()> {
        txn.put(root_key(Bucket::Blocks, &block.root), encode(&**block)?);
        append_root(txn, numeric_key(Bucket::BlockSlotIndices, block.slot), &block.root)?;
        append_root(txn, root_key(Bucket::BlockParentRootIndices, &block.parent_root), &block.root)?;
        self.presence.mark_in_txn(txn, SlotKind::Block, block.slot)?;

        let (cache, block) = (self.cache.clone(), block.clone());
        txn.on_commit(move || {
            cache.insert(block.root, block);
        });
        Ok(())
    }

    fn read_block(txn: &ReadTxn<'_>, root: &Root) -> StoreResult<Arc<BlockRecord>> {
        Ok(Arc::new(decode(&txn.read(&root_key(Bucket::Blocks, root))?)?))
    }

    fn read_metadata_root(&self, key: &[u8]) -> StoreResult<Root> {
        let key = DbKey::new(Bucket::ChainMetadata, key);
        let bytes = self.db.run_read_txn(|txn| txn.read(&key))?;
        Root::from_slice(&bytes).ok_or_else(|| StoreError::DataInconsistency(format!("{key} does not hold a root")))
    }

    fn write_metadata_root(&self, key: &[u8], root: Root) -> StoreResult<()> {
        self.db.run_write_txn(|txn| {
            txn.put(DbKey::new(Bucket::ChainMetadata, key), root.as_ref());
            Ok(())
        })
    }
}

impl BlockStoreReader for DbBlockStore {
    fn block(&self, root: Root) -> StoreResult<Arc<BlockRecord>> {
        if let Some(block) = self.cache.get(&root) {
            return Ok(block);
        }
        // A delete committing after the read evicts through the commit hook; the generation
        // check keeps this fill from resurrecting it
        let generation = self.cache.generation();
        let block = self.db.run_read_txn(|txn| Self::read_block(txn, &root))?;
        self.cache.insert_if_unchanged(root, block.clone(), generation);
        Ok(block)
    }

    fn has_block(&self, root: Root) -> StoreResult<bool> {
        if self.cache.contains_key(&root) {
            return Ok(true);
        }
        self.db.run_read_txn(|txn| txn.has(&root_key(Bucket::Blocks, &root)))
    }

    fn block_roots_at_slot(&self, slot: Slot) -> StoreResult<Vec<Root>> {
        self.db.run_read_txn(|txn| read_roots(txn, &numeric_key(Bucket::BlockSlotIndices, slot)))
    }

    fn block_roots_in_slot_range(&self, start: Slot, end: Slot) -> StoreResult<Vec<Root>> {
        if start > end {
            return Ok(Vec::new());
        }
        self.db.run_read_txn(|txn| slot_range_roots(txn, start, end))
    }

    fn block_roots_by_parent(&self, parent_root: Root) -> StoreResult<Vec<Root>> {
        self.db.run_read_txn(|txn| read_roots(txn, &root_key(Bucket::BlockParentRootIndices, &parent_root)))
    }

    fn blocks(&self, filter: &BlockFilter) -> StoreResult<Vec<Arc<BlockRecord>>> {
        self.db.run_read_txn(|txn| {
            let mut candidates = Vec::new();
            if filter.has_slot_range() {
                let (start, end) = (filter.start_slot.unwrap_or(0), filter.end_slot.unwrap_or(Slot::MAX));
                if start > end {
                    return Ok(Vec::new());
                }
                candidates.push(slot_range_roots(txn, start, end)?);
            }
            if let Some(parent_root) = filter.parent_root {
                candidates.push(read_roots(txn, &root_key(Bucket::BlockParentRootIndices, &parent_root))?);
            }
            match intersect(candidates) {
                Some(roots) => roots.iter().map(|root| Self::read_block(txn, root)).collect(),
                None => txn
                    .prefix_iter(&DbKey::prefix_only(Bucket::Blocks))
                    .map(|item| -> StoreResult<Arc<BlockRecord>> { Ok(Arc::new(decode(&item?.1)?)) })
                    .collect(),
            }
        })
    }

    fn highest_slot_block_below(&self, slot: Slot) -> StoreResult<Vec<Arc<BlockRecord>>> {
        let bitmap = self.presence.bitmap(SlotKind::Block);
        let mut below = slot;
        // Deleted blocks leave their presence bit set, so a marked slot may turn out empty
        while let Some(candidate) = bitmap.highest_below(below) {
            let roots = self.block_roots_at_slot(candidate)?;
            if !roots.is_empty() {
                return roots.into_iter().map(|root| self.block(root)).collect();
            }
            below = candidate;
        }
        Ok(Vec::new())
    }

    fn genesis_block_root(&self) -> StoreResult<Root> {
        self.read_metadata_root(GENESIS_ROOT_KEY)
    }

    fn head_block_root(&self) -> StoreResult<Root> {
        self.read_metadata_root(HEAD_ROOT_KEY)
    }

    fn is_finalized_block(&self, root: Root) -> StoreResult<bool> {
        self.db.run_read_txn(|txn| txn.has(&root_key(Bucket::FinalizedBlockRootsIndex, &root)))
    }
}

impl BlockStore for DbBlockStore {
    fn save_block(&self, block: Arc<BlockRecord>) -> StoreResult<()> {
        self.db.run_write_txn(|txn| self.save_in_txn(txn, &block))
    }

    fn save_blocks(&self, blocks: &[Arc<BlockRecord>]) -> StoreResult<()> {
        self.db.run_write_txn(|txn| blocks.iter().try_for_each(|block| self.save_in_txn(txn, block)))
    }

    fn delete_block(&self, root: Root) -> StoreResult<()> {
        self.db.run_write_txn(|txn| {
            let key = root_key(Bucket::Blocks, &root);
            let Some(bytes) = txn.get(&key)? else {
                return Ok(());
            };
            let block: BlockRecord = decode(&bytes)?;
            txn.delete(key);
            remove_root(txn, numeric_key(Bucket::BlockSlotIndices, block.slot), &root)?;
            remove_root(txn, root_key(Bucket::BlockParentRootIndices, &block.parent_root), &root)?;
            let cache = self.cache.clone();
            txn.on_commit(move || {
                cache.remove(&root);
            });
            Ok(())
        })
    }

    fn save_genesis_block_root(&self, root: Root) -> StoreResult<()> {
        self.write_metadata_root(GENESIS_ROOT_KEY, root)
    }

    fn save_head_block_root(&self, root: Root) -> StoreResult<()> {
        self.write_metadata_root(HEAD_ROOT_KEY, root)
    }

    fn save_finalized_block_roots(&self, roots: &[Root]) -> StoreResult<()> {
        self.db.run_write_txn(|txn| {
            for root in roots {
                txn.put(root_key(Bucket::FinalizedBlockRootsIndex, root), Vec::new());
            }
            Ok(())
        })
    }
}

fn slot_range_roots(txn: &ReadTxn<'_>, start: Slot, end: Slot) -> StoreResult<Vec<Root>> {
    let (from, to) = (numeric_key(Bucket::BlockSlotIndices, start), numeric_key(Bucket::BlockSlotIndices, end));
    let mut roots = Vec::new();
    for item in txn.range_iter(&from, &to) {
        let (_, value) = item?;
        roots.extend(index::decode_roots(&value)?);
    }
    Ok(roots)
}
