use super::{decode, encode};
use crate::{
    bitmap::{PresenceIndex, SlotKind},
    db::ChainDb,
    errors::StoreResult,
    index::root_key,
    key::DbKey,
    registry::Bucket,
    summary_cache::StateSummaryCache,
    txn::WriteTxn,
    types::{Root, Slot, StateRecord, StateSummary},
};
use std::sync::Arc;

pub trait StateStoreReader {
    fn state(&self, root: Root) -> StoreResult<Arc<StateRecord>>;
    fn has_state(&self, root: Root) -> StoreResult<bool>;
    fn highest_slot_state_below(&self, slot: Slot) -> StoreResult<Vec<Arc<StateRecord>>>;
    fn state_summary(&self, root: Root) -> StoreResult<StateSummary>;
    fn has_state_summary(&self, root: Root) -> StoreResult<bool>;
}

pub trait StateStore: StateStoreReader {
    fn save_state(&self, state: &StateRecord) -> StoreResult<()>;
    fn delete_state(&self, root: Root) -> StoreResult<()>;
    fn save_state_summary(&self, summary: StateSummary) -> StoreResult<()>;
}

/// States and their summaries. Summaries are looked up in the caller owned
/// [`StateSummaryCache`] before the database.
#[derive(Clone)]
pub struct DbStateStore {
    db: Arc<ChainDb>,
    presence: PresenceIndex,
    summaries: Arc<StateSummaryCache>,
}

impl DbStateStore {
    pub fn new(db: Arc<ChainDb>, presence: PresenceIndex, summaries: Arc<StateSummaryCache>) -> Self {
        Self { db, presence, summaries }
    }

    pub fn save_in_txn(&self, txn: &mut WriteTxn<'_>, state: &StateRecord) -> StoreResult<()> {
        txn.put(root_key(Bucket::States, &state.root), encode(state)?);
        // Every stored state is locatable through its summary, also after the state itself is deleted
        txn.put(root_key(Bucket::StateSummaries, &state.root), encode(&state.summary())?);
        self.presence.mark_in_txn(txn, SlotKind::State, state.slot)
    }
}

impl StateStoreReader for DbStateStore {
    fn state(&self, root: Root) -> StoreResult<Arc<StateRecord>> {
        let bytes = self.db.run_read_txn(|txn| txn.read(&root_key(Bucket::States, &root)))?;
        Ok(Arc::new(decode(&bytes)?))
    }

    fn has_state(&self, root: Root) -> StoreResult<bool> {
        self.db.run_read_txn(|txn| txn.has(&root_key(Bucket::States, &root)))
    }

    fn highest_slot_state_below(&self, slot: Slot) -> StoreResult<Vec<Arc<StateRecord>>> {
        // No marked slot below means no candidate summary either
        if self.presence.bitmap(SlotKind::State).highest_below(slot).is_none() {
            return Ok(Vec::new());
        }
        self.db.run_read_txn(|txn| {
            let mut best: Option<Slot> = None;
            let mut roots = Vec::new();
            for item in txn.prefix_iter(&DbKey::prefix_only(Bucket::StateSummaries)) {
                let summary: StateSummary = decode(&item?.1)?;
                if summary.slot >= slot || best.is_some_and(|best| summary.slot < best) {
                    continue;
                }
                if !txn.has(&root_key(Bucket::States, &summary.root))? {
                    continue;
                }
                if best != Some(summary.slot) {
                    best = Some(summary.slot);
                    roots.clear();
                }
                roots.push(summary.root);
            }
            roots
                .iter()
                .map(|root| -> StoreResult<Arc<StateRecord>> { Ok(Arc::new(decode(&txn.read(&root_key(Bucket::States, root))?)?)) })
                .collect()
        })
    }

    fn state_summary(&self, root: Root) -> StoreResult<StateSummary> {
        if let Some(summary) = self.summaries.get(&root) {
            return Ok(summary);
        }
        let bytes = self.db.run_read_txn(|txn| txn.read(&root_key(Bucket::StateSummaries, &root)))?;
        decode(&bytes)
    }

    fn has_state_summary(&self, root: Root) -> StoreResult<bool> {
        if self.summaries.has(&root) {
            return Ok(true);
        }
        self.db.run_read_txn(|txn| txn.has(&root_key(Bucket::StateSummaries, &root)))
    }
}

impl StateStore for DbStateStore {
    fn save_state(&self, state: &StateRecord) -> StoreResult<()> {
        self.db.run_write_txn(|txn| self.save_in_txn(txn, state))
    }

    fn delete_state(&self, root: Root) -> StoreResult<()> {
        self.db.run_write_txn(|txn| {
            txn.delete(root_key(Bucket::States, &root));
            Ok(())
        })
    }

    fn save_state_summary(&self, summary: StateSummary) -> StoreResult<()> {
        self.db.run_write_txn(|txn| {
            txn.put(root_key(Bucket::StateSummaries, &summary.root), encode(&summary)?);
            let summaries = self.summaries.clone();
            txn.on_commit(move || summaries.put(summary.root, summary));
            Ok(())
        })
    }
}
