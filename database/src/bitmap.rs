//! Per-kind slot presence bitmaps answering "does slot S hold a stored object" without a
//! bucket scan.
//!
//! The durable copy lives in [`Bucket::SlotsHasObject`] as fixed size chunks and is updated
//! inside the write transaction that stores the object. The in-memory copy is set from that
//! transaction's commit hook, so it never reports a slot whose object was rolled back.

use crate::{
    db::ChainDb,
    errors::{StoreError, StoreResult},
    key::DbKey,
    registry::Bucket,
    txn::WriteTxn,
    types::Slot,
};
use parking_lot::Mutex;
use std::{collections::BTreeMap, sync::Arc};

/// Bytes per durable chunk
pub const CHUNK_BYTES: usize = 1024;
pub const SLOTS_PER_CHUNK: u64 = CHUNK_BYTES as u64 * 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SlotKind {
    Block = 0,
    State = 1,
}

impl SlotKind {
    pub const ALL: [SlotKind; 2] = [SlotKind::Block, SlotKind::State];
}

type Chunk = Box<[u8; CHUNK_BYTES]>;

/// A sparse packed bitmap guarded by its own lock. Bits live in fixed size chunks that are
/// allocated on first use, mirroring the durable layout, so memory follows the number of
/// populated chunks rather than the highest slot.
#[derive(Debug, Default)]
pub struct SlotBitmap {
    chunks: Mutex<BTreeMap<u64, Chunk>>,
}

impl SlotBitmap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the bit of `slot`. Returns `true` if it was not set before.
    pub fn mark_present(&self, slot: Slot) -> bool {
        let (chunk_index, byte, mask) = locate(slot);
        let mut chunks = self.chunks.lock();
        let chunk = chunks.entry(chunk_index).or_insert_with(|| Box::new([0; CHUNK_BYTES]));
        let newly_set = chunk[byte] & mask == 0;
        chunk[byte] |= mask;
        newly_set
    }

    pub fn is_present(&self, slot: Slot) -> bool {
        let (chunk_index, byte, mask) = locate(slot);
        self.chunks.lock().get(&chunk_index).is_some_and(|chunk| chunk[byte] & mask != 0)
    }

    /// The highest present slot strictly below `slot`
    pub fn highest_below(&self, slot: Slot) -> Option<Slot> {
        let last = slot.checked_sub(1)?;
        let (last_chunk, last_byte, last_mask) = locate(last);
        let chunks = self.chunks.lock();
        for (&chunk_index, chunk) in chunks.range(..=last_chunk).rev() {
            // Only the chunk holding `last` is partial: bits up to and including `last_mask`
            let (end, end_mask) =
                if chunk_index == last_chunk { (last_byte, (last_mask as u16 * 2 - 1) as u8) } else { (CHUNK_BYTES - 1, u8::MAX) };
            let masked = chunk[end] & end_mask;
            if masked != 0 {
                return Some(slot_of(chunk_index, end, masked));
            }
            if let Some(byte) = (0..end).rev().find(|&byte| chunk[byte] != 0) {
                return Some(slot_of(chunk_index, byte, chunk[byte]));
            }
        }
        None
    }

    /// Merges a durable chunk into the bitmap
    pub fn load_chunk(&self, chunk_index: u64, chunk: &[u8]) -> StoreResult<()> {
        if chunk_index > Slot::MAX / SLOTS_PER_CHUNK {
            return Err(StoreError::DataInconsistency(format!("presence chunk index {chunk_index} is out of the slot range")));
        }
        let Ok(chunk) = <&[u8; CHUNK_BYTES]>::try_from(chunk) else {
            return Err(StoreError::DataInconsistency(format!("presence chunk {chunk_index} has {} bytes", chunk.len())));
        };
        let mut chunks = self.chunks.lock();
        let dst = chunks.entry(chunk_index).or_insert_with(|| Box::new([0; CHUNK_BYTES]));
        for (dst, src) in dst.iter_mut().zip(chunk) {
            *dst |= src;
        }
        Ok(())
    }

    /// The number of allocated chunks
    pub fn chunk_count(&self) -> usize {
        self.chunks.lock().len()
    }
}

/// Chunk index, byte within the chunk and bit mask of `slot`
fn locate(slot: Slot) -> (u64, usize, u8) {
    let bit = slot % SLOTS_PER_CHUNK;
    (slot / SLOTS_PER_CHUNK, (bit / 8) as usize, 1u8 << (bit % 8))
}

/// The slot of the highest set bit of the non-zero `bits` at `byte` of chunk `chunk_index`
fn slot_of(chunk_index: u64, byte: usize, bits: u8) -> Slot {
    chunk_index * SLOTS_PER_CHUNK + byte as u64 * 8 + (7 - bits.leading_zeros()) as u64
}

fn chunk_key(kind: SlotKind, chunk_index: u64) -> DbKey {
    let mut key = DbKey::prefix_only(Bucket::SlotsHasObject);
    key.add_bucket([kind as u8]);
    key.add_key(chunk_index.to_be_bytes());
    key
}

/// Block and state presence bitmaps of one store instance
#[derive(Clone, Debug)]
pub struct PresenceIndex {
    block: Arc<SlotBitmap>,
    state: Arc<SlotBitmap>,
}

impl Default for PresenceIndex {
    fn default() -> Self {
        Self { block: Arc::new(SlotBitmap::new()), state: Arc::new(SlotBitmap::new()) }
    }
}

impl PresenceIndex {
    /// Builds the in-memory bitmaps from their durable chunks
    pub fn load(db: &ChainDb) -> StoreResult<Self> {
        let index = Self::default();
        db.run_read_txn(|txn| {
            for kind in SlotKind::ALL {
                let mut prefix = DbKey::prefix_only(Bucket::SlotsHasObject);
                prefix.add_bucket([kind as u8]);
                for item in txn.prefix_iter(&prefix) {
                    let (key, chunk) = item?;
                    let chunk_index = <[u8; 8]>::try_from(key.as_ref())
                        .map(u64::from_be_bytes)
                        .map_err(|_| StoreError::DataInconsistency(format!("malformed presence chunk key of {kind:?}")))?;
                    index.bitmap(kind).load_chunk(chunk_index, &chunk)?;
                }
            }
            Ok(())
        })?;
        Ok(index)
    }

    pub fn bitmap(&self, kind: SlotKind) -> &Arc<SlotBitmap> {
        match kind {
            SlotKind::Block => &self.block,
            SlotKind::State => &self.state,
        }
    }

    pub fn mark_present(&self, kind: SlotKind, slot: Slot) -> bool {
        self.bitmap(kind).mark_present(slot)
    }

    pub fn is_present(&self, kind: SlotKind, slot: Slot) -> bool {
        self.bitmap(kind).is_present(slot)
    }

    /// Sets the durable bit of `slot` within `txn` and the in-memory bit once `txn` commits.
    /// The durable chunk is always consulted: a bit set through [`PresenceIndex::mark_present`]
    /// exists in memory only.
    pub fn mark_in_txn(&self, txn: &mut WriteTxn<'_>, kind: SlotKind, slot: Slot) -> StoreResult<()> {
        let (chunk_index, byte, mask) = locate(slot);
        let key = chunk_key(kind, chunk_index);
        let mut chunk = txn.get(&key)?.unwrap_or_else(|| vec![0; CHUNK_BYTES]);
        if chunk.len() != CHUNK_BYTES {
            return Err(StoreError::DataInconsistency(format!("presence chunk {key} has {} bytes", chunk.len())));
        }
        if chunk[byte] & mask == 0 {
            chunk[byte] |= mask;
            txn.put(key, chunk);
        }

        let bitmap = self.bitmap(kind).clone();
        txn.on_commit(move || {
            bitmap.mark_present(slot);
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ConnBuilder;
    use std::thread;

    #[test]
    fn test_mark_is_idempotent() {
        let bitmap = SlotBitmap::new();
        assert!(!bitmap.is_present(5));
        assert!(bitmap.mark_present(5));
        assert!(!bitmap.mark_present(5));
        assert!(bitmap.is_present(5));
        assert!(!bitmap.is_present(4));
        assert!(!bitmap.is_present(u64::MAX / 16));
    }

    #[test]
    fn test_sparse_chunks() {
        let bitmap = SlotBitmap::new();
        for slot in [0, 7, SLOTS_PER_CHUNK - 1] {
            bitmap.mark_present(slot);
        }
        assert_eq!(bitmap.chunk_count(), 1);
        // Far away slots allocate a single chunk each
        for slot in [1u64 << 62, u64::MAX] {
            assert!(bitmap.mark_present(slot));
            assert!(bitmap.is_present(slot));
        }
        assert_eq!(bitmap.chunk_count(), 3);
        for slot in [0, 7, SLOTS_PER_CHUNK - 1] {
            assert!(bitmap.is_present(slot), "slot {slot} lost");
        }
        assert!(!bitmap.is_present(1));
        assert!(!bitmap.is_present((1u64 << 62) + 1));
        assert_eq!(bitmap.highest_below(u64::MAX), Some(1u64 << 62));
        assert_eq!(bitmap.highest_below(1u64 << 62), Some(SLOTS_PER_CHUNK - 1));
    }

    #[test]
    fn test_malformed_chunks_are_rejected() {
        let bitmap = SlotBitmap::new();
        assert!(bitmap.load_chunk(0, &[0xff; 10]).is_err());
        assert!(bitmap.load_chunk(u64::MAX, &[0; CHUNK_BYTES]).is_err());
        bitmap.load_chunk(Slot::MAX / SLOTS_PER_CHUNK, &[0x80; CHUNK_BYTES]).unwrap();
        assert!(bitmap.is_present(Slot::MAX));
        assert_eq!(bitmap.chunk_count(), 1);
    }

    #[test]
    fn test_highest_below() {
        let bitmap = SlotBitmap::new();
        assert_eq!(bitmap.highest_below(100), None);
        for slot in [3, 9, 16, 20_000] {
            bitmap.mark_present(slot);
        }
        assert_eq!(bitmap.highest_below(0), None);
        assert_eq!(bitmap.highest_below(3), None);
        assert_eq!(bitmap.highest_below(4), Some(3));
        assert_eq!(bitmap.highest_below(16), Some(9));
        assert_eq!(bitmap.highest_below(17), Some(16));
        assert_eq!(bitmap.highest_below(20_000), Some(16));
        assert_eq!(bitmap.highest_below(u64::MAX), Some(20_000));
    }

    #[test]
    fn test_concurrent_marks_are_not_lost() {
        let index = PresenceIndex::default();
        let slots: Vec<Slot> = (0..128u64).map(|i| i * 997 + i % 8).collect();
        thread::scope(|s| {
            for &slot in &slots {
                let index = &index;
                s.spawn(move || index.mark_present(SlotKind::Block, slot));
            }
        });
        for &slot in &slots {
            assert!(index.is_present(SlotKind::Block, slot), "lost update for slot {slot}");
            assert!(!index.is_present(SlotKind::State, slot));
        }
    }

    #[test]
    fn test_durable_marks_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bitmap.db");
        {
            let db = ConnBuilder::default().with_db_path(path.clone()).with_files_limit(10).build().unwrap();
            let index = PresenceIndex::load(&db).unwrap();
            db.run_write_txn(|txn| {
                index.mark_in_txn(txn, SlotKind::Block, 10)?;
                index.mark_in_txn(txn, SlotKind::Block, 11)?;
                index.mark_in_txn(txn, SlotKind::State, SLOTS_PER_CHUNK * 3 + 1)?;
                // Not visible in memory before commit
                assert!(!index.is_present(SlotKind::Block, 10));
                Ok(())
            })
            .unwrap();
            assert!(index.is_present(SlotKind::Block, 10));

            let rolled_back: StoreResult<()> = db.run_write_txn(|txn| {
                index.mark_in_txn(txn, SlotKind::Block, 12)?;
                Err(StoreError::DataInconsistency("abort".into()))
            });
            assert!(rolled_back.is_err());
            assert!(!index.is_present(SlotKind::Block, 12));
        }

        let db = ConnBuilder::default().with_db_path(path).with_files_limit(10).build().unwrap();
        let index = PresenceIndex::load(&db).unwrap();
        assert!(index.is_present(SlotKind::Block, 10));
        assert!(index.is_present(SlotKind::Block, 11));
        assert!(!index.is_present(SlotKind::Block, 12));
        assert!(index.is_present(SlotKind::State, SLOTS_PER_CHUNK * 3 + 1));
        assert!(!index.is_present(SlotKind::Block, SLOTS_PER_CHUNK * 3 + 1));
    }

    #[test]
    fn test_memory_only_mark_still_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bitmap.db");
        {
            let db = ConnBuilder::default().with_db_path(path.clone()).with_files_limit(10).build().unwrap();
            let index = PresenceIndex::load(&db).unwrap();
            index.mark_present(SlotKind::State, 5);
            db.run_write_txn(|txn| index.mark_in_txn(txn, SlotKind::State, 5)).unwrap();
        }

        let db = ConnBuilder::default().with_db_path(path).with_files_limit(10).build().unwrap();
        let index = PresenceIndex::load(&db).unwrap();
        assert!(index.is_present(SlotKind::State, 5));
        assert_eq!(index.bitmap(SlotKind::State).highest_below(6), Some(5));
    }
}
