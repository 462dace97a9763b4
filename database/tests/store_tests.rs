use beacon_database::{
    prelude::*,
    schema::existing_buckets,
    types::{BlockRecord, Root, Slot, StateRecord},
    utils::get_chaindb_tempdir,
};
use prometheus::Registry;
use rand::{Rng, thread_rng};
use std::{
    path::Path,
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

fn open(dir: &Path, registry: &Registry) -> StoreResult<ChainStore> {
    ChainStore::open_with_registry(dir, Arc::new(StateSummaryCache::new()), StoreConfig::for_tests(), registry)
}

fn random_block(slot: Slot, parent_root: Root) -> Arc<BlockRecord> {
    let mut rng = thread_rng();
    let root = Root::from_bytes(rng.r#gen());
    let payload: Vec<u8> = (0..rng.gen_range(32..256)).map(|_| rng.r#gen()).collect();
    Arc::new(BlockRecord::new(root, slot, parent_root, payload))
}

#[test]
fn test_open_is_idempotent_and_durable() {
    let tempdir = get_chaindb_tempdir().unwrap();
    let registry = Registry::new();
    let genesis = random_block(0, Root::ZERO);
    let child = random_block(1, genesis.root);
    {
        let mut store = open(tempdir.path(), &registry).unwrap();
        assert_eq!(existing_buckets(store.db().unwrap()).unwrap(), Bucket::ALL.to_vec());
        store.blocks().unwrap().save_blocks(&[genesis.clone(), child.clone()]).unwrap();
        store.states().unwrap().save_state(&StateRecord::new(child.root, 1, vec![7; 100])).unwrap();
        store.close().unwrap();
    }

    let store = open(tempdir.path(), &registry).unwrap();
    assert_eq!(existing_buckets(store.db().unwrap()).unwrap(), Bucket::ALL.to_vec());
    let blocks = store.blocks().unwrap();
    assert_eq!(blocks.block(child.root).unwrap(), child);
    assert_eq!(blocks.block_roots_at_slot(1).unwrap(), vec![child.root]);
    assert_eq!(blocks.block_roots_by_parent(genesis.root).unwrap(), vec![child.root]);
    let presence = store.presence().unwrap();
    assert!(presence.is_present(SlotKind::Block, 0));
    assert!(presence.is_present(SlotKind::Block, 1));
    assert!(presence.is_present(SlotKind::State, 1));
    assert!(!presence.is_present(SlotKind::State, 0));
    assert_eq!(store.states().unwrap().state(child.root).unwrap().payload.as_slice(), &[7u8; 100]);
}

#[test]
fn test_second_open_times_out() {
    let tempdir = get_chaindb_tempdir().unwrap();
    let registry = Registry::new();
    let first = open(tempdir.path(), &registry).unwrap();

    let start = Instant::now();
    let second = open(tempdir.path(), &registry);
    let elapsed = start.elapsed();
    match second {
        Err(err) => assert!(err.is_lock_timeout(), "unexpected error {err}"),
        Ok(_) => panic!("a second open of the same path must fail"),
    }
    assert!(elapsed >= DEFAULT_LOCK_TIMEOUT, "gave up after {elapsed:?}");
    assert!(elapsed <= DEFAULT_LOCK_TIMEOUT + Duration::from_millis(500), "waited {elapsed:?}");
    // The failed open registered nothing
    assert!(first.metrics_registered());

    drop(first);
    let reopened = open(tempdir.path(), &registry).unwrap();
    assert!(reopened.metrics_registered());
}

#[test]
fn test_clear_db_without_directory() {
    let tempdir = get_chaindb_tempdir().unwrap();
    let dir = tempdir.path().join("store");
    let mut store = open(&dir, &Registry::new()).unwrap();
    store.close().unwrap();
    std::fs::remove_dir_all(&dir).unwrap();

    store.clear_db().unwrap();
    assert!(!dir.exists());
    delete_db(&dir.join(DATABASE_FILE_NAME)).unwrap();
}

#[test]
fn test_clear_db_after_close() {
    let tempdir = get_chaindb_tempdir().unwrap();
    let dir = tempdir.path().join("store");
    let mut store = open(&dir, &Registry::new()).unwrap();
    store.blocks().unwrap().save_block(random_block(3, Root::ZERO)).unwrap();
    store.close().unwrap();

    store.clear_db().unwrap();
    assert_eq!(store.database_path(), dir);
    assert!(!dir.join(DATABASE_FILE_NAME).exists());
    assert!(dir.exists());
}

#[test]
fn test_clear_and_reopen_in_default_registry() {
    let tempdir = get_chaindb_tempdir().unwrap();
    let summaries = Arc::new(StateSummaryCache::new());
    let mut store = ChainStore::open_with_config(tempdir.path(), summaries.clone(), StoreConfig::for_tests()).unwrap();
    assert!(store.metrics_registered());
    let block = random_block(5, Root::ZERO);
    store.blocks().unwrap().save_block(block.clone()).unwrap();

    store.clear_db().unwrap();
    assert!(matches!(store.blocks(), Err(StoreError::Closed)));

    let store = ChainStore::open_with_config(tempdir.path(), summaries, StoreConfig::for_tests()).unwrap();
    assert!(store.metrics_registered());
    assert!(!store.blocks().unwrap().has_block(block.root).unwrap());
    assert!(!store.presence().unwrap().is_present(SlotKind::Block, 5));
}

#[test]
fn test_two_stores_in_one_registry() {
    let tempdir = get_chaindb_tempdir().unwrap();
    let registry = Registry::new();
    let a = open(&tempdir.path().join("a"), &registry).unwrap();
    let b = open(&tempdir.path().join("b"), &registry).unwrap();
    assert!(a.metrics_registered());
    assert!(b.metrics_registered());
    assert!(!registry.gather().is_empty());
}

#[test]
fn test_evicted_blocks_resolve_from_db() {
    let tempdir = get_chaindb_tempdir().unwrap();
    let config = StoreConfig { block_cache_max_cost: 4096, ..StoreConfig::for_tests() };
    let store = ChainStore::open_with_registry(tempdir.path(), Arc::new(StateSummaryCache::new()), config, &Registry::new()).unwrap();
    let blocks_store = store.blocks().unwrap();

    let mut parent = Root::ZERO;
    let blocks: Vec<_> = (0..100)
        .map(|slot| {
            let block = random_block(slot, parent);
            parent = block.root;
            block
        })
        .collect();
    for block in &blocks {
        blocks_store.save_block(block.clone()).unwrap();
    }
    assert!(blocks_store.cache().len() < blocks.len());
    assert!(blocks_store.cache().tracked_cost() <= 4096);
    for block in &blocks {
        assert_eq!(&blocks_store.block(block.root).unwrap(), block);
    }
}

#[test]
fn test_concurrent_presence_marks() {
    let tempdir = get_chaindb_tempdir().unwrap();
    let store = open(tempdir.path(), &Registry::new()).unwrap();
    let slots: Vec<Slot> = (0..100u64).map(|i| i * 131 + 7).collect();

    thread::scope(|s| {
        for &slot in &slots {
            let store = &store;
            s.spawn(move || {
                store.blocks().unwrap().save_block(random_block(slot, Root::ZERO)).unwrap();
                store.presence().unwrap().mark_present(SlotKind::State, slot);
            });
        }
    });

    let presence = store.presence().unwrap();
    for &slot in &slots {
        assert!(presence.is_present(SlotKind::Block, slot), "block slot {slot} lost");
        assert!(presence.is_present(SlotKind::State, slot), "state slot {slot} lost");
    }
    assert_eq!(store.blocks().unwrap().block_roots_by_parent(Root::ZERO).unwrap().len(), slots.len());
}

#[test]
fn test_durable_round_trip_through_transactions() {
    let tempdir = get_chaindb_tempdir().unwrap();
    let store = open(tempdir.path(), &Registry::new()).unwrap();
    let db = store.db().unwrap();
    let payload: Vec<u8> = (0..4096).map(|_| thread_rng().r#gen()).collect();
    let key = DbKey::new(Bucket::Blocks, Root::from(11));

    db.run_write_txn(|txn| {
        txn.put(key.clone(), payload.clone());
        Ok(())
    })
    .unwrap();
    assert_eq!(db.run_read_txn(|txn| txn.read(&key)).unwrap(), payload);

    let panicked = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        let _ = db.run_write_txn(|txn| -> StoreResult<()> {
            txn.delete(key.clone());
            panic!("abort inside the transaction");
        });
    }));
    assert!(panicked.is_err());
    assert_eq!(db.run_read_txn(|txn| txn.read(&key)).unwrap(), payload);
}

#[test]
fn test_presence_marked_in_memory_survives_reopen() {
    let tempdir = get_chaindb_tempdir().unwrap();
    let registry = Registry::new();
    let root = Root::from(21);
    {
        let store = open(tempdir.path(), &registry).unwrap();
        store.presence().unwrap().mark_present(SlotKind::State, 5);
        store.states().unwrap().save_state(&StateRecord::new(root, 5, vec![1; 32])).unwrap();
    }

    let store = open(tempdir.path(), &registry).unwrap();
    assert!(store.presence().unwrap().is_present(SlotKind::State, 5));
    let states = store.states().unwrap().highest_slot_state_below(6).unwrap();
    assert_eq!(states.iter().map(|state| state.root).collect::<Vec<_>>(), vec![root]);
}

#[test]
fn test_far_slots_do_not_exhaust_memory() {
    let tempdir = get_chaindb_tempdir().unwrap();
    let registry = Registry::new();
    let far = random_block(1 << 62, Root::ZERO);
    {
        let store = open(tempdir.path(), &registry).unwrap();
        store.blocks().unwrap().save_block(far.clone()).unwrap();
        assert!(store.presence().unwrap().is_present(SlotKind::Block, far.slot));
    }

    let store = open(tempdir.path(), &registry).unwrap();
    assert!(store.presence().unwrap().is_present(SlotKind::Block, far.slot));
    assert_eq!(store.presence().unwrap().bitmap(SlotKind::Block).chunk_count(), 1);
    assert_eq!(store.blocks().unwrap().highest_slot_block_below(Slot::MAX).unwrap(), vec![far]);
}
