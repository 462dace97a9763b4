use crate::errors::{StoreError, StoreResult};
use beacon_utils::mem_size::{MemMode, MemSizeEstimator};
use indexmap::IndexMap;
use parking_lot::RwLock;
use rand::Rng;
use std::{
    collections::hash_map::RandomState,
    hash::BuildHasher,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

/// Number of random entries inspected when picking an eviction victim
const EVICTION_SAMPLE: usize = 5;

/// Hit counters are halved after this many insertions per unit of capacity, so that
/// formerly hot entries eventually become evictable
const AGING_FACTOR: usize = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CachePolicy {
    /// At most `n` entries, each costing one unit
    Count(usize),
    /// At most `max_items` entries whose summed cost, measured in `mem_mode`, stays within `max_cost`
    Tracked { max_cost: usize, max_items: usize, mem_mode: MemMode },
}

impl CachePolicy {
    fn max_cost(&self) -> usize {
        match *self {
            CachePolicy::Count(n) => n,
            CachePolicy::Tracked { max_cost, .. } => max_cost,
        }
    }

    fn max_items(&self) -> usize {
        match *self {
            CachePolicy::Count(n) => n,
            CachePolicy::Tracked { max_items, .. } => max_items,
        }
    }
}

struct Entry<TData> {
    data: TData,
    cost: usize,
    hits: AtomicU64,
}

struct Inner<TKey, TData, S = RandomState> {
    // IndexMap makes picking (and removing) random entries cheap
    map: IndexMap<TKey, Entry<TData>, S>,
    tracked_cost: usize,
    inserts_since_aging: usize,
    // Bumped by every removal, see `Cache::insert_if_unchanged`
    generation: u64,
}

/// A bounded, concurrent in-memory cache. It is never a source of truth: an entry may be
/// declined or evicted at any time, so a miss only means "ask the database".
#[derive(Clone)]
pub struct Cache<TKey, TData, S = RandomState>
where
    TKey: Clone + std::hash::Hash + Eq + Send + Sync,
    TData: Clone + Send + Sync + MemSizeEstimator,
{
    inner: Arc<RwLock<Inner<TKey, TData, S>>>,
    policy: CachePolicy,
}

impl<TKey, TData, S> Cache<TKey, TData, S>
where
    TKey: Clone + std::hash::Hash + Eq + Send + Sync,
    TData: Clone + Send + Sync + MemSizeEstimator,
    S: BuildHasher + Default,
{
    pub fn new(policy: CachePolicy) -> StoreResult<Self> {
        if policy.max_cost() == 0 || policy.max_items() == 0 {
            return Err(StoreError::CacheConstruction(format!("cache bounds must be positive, got {policy:?}")));
        }
        // Pre-allocate for the entry bound but never more than a modest amount up front
        let capacity = policy.max_items().min(1 << 12);
        let inner = Inner {
            map: IndexMap::with_capacity_and_hasher(capacity, S::default()),
            tracked_cost: 0,
            inserts_since_aging: 0,
            generation: 0,
        };
        Ok(Self { inner: Arc::new(RwLock::new(inner)), policy })
    }

    pub fn get(&self, key: &TKey) -> Option<TData> {
        self.inner.read().map.get(key).map(|entry| {
            entry.hits.fetch_add(1, Ordering::Relaxed);
            entry.data.clone()
        })
    }

    pub fn contains_key(&self, key: &TKey) -> bool {
        self.inner.read().map.contains_key(key)
    }

    fn estimate_cost(&self, data: &TData) -> usize {
        match self.policy {
            CachePolicy::Count(_) => 1,
            CachePolicy::Tracked { mem_mode, .. } => data.estimate_size(mem_mode),
        }
    }

    /// Caches `data` at the cost estimated by the policy's memory mode
    pub fn insert(&self, key: TKey, data: TData) -> bool {
        let cost = self.estimate_cost(&data);
        self.insert_inner(key, data, cost, None)
    }

    /// Caches `data` at an explicit `cost`. Returns `false` if the entry was declined
    /// because it alone exceeds the cost bound.
    pub fn insert_with_cost(&self, key: TKey, data: TData, cost: usize) -> bool {
        self.insert_inner(key, data, cost, None)
    }

    /// The removal generation. Take it before reading a value from the database and pass it to
    /// [`Cache::insert_if_unchanged`] when caching that value.
    pub fn generation(&self) -> u64 {
        self.inner.read().generation
    }

    /// Caches `data` only if nothing was removed from the cache since `generation` was taken.
    /// A removal in between may stand for a deletion the read did not observe.
    pub fn insert_if_unchanged(&self, key: TKey, data: TData, generation: u64) -> bool {
        let cost = self.estimate_cost(&data);
        self.insert_inner(key, data, cost, Some(generation))
    }

    fn insert_inner(&self, key: TKey, data: TData, cost: usize, generation: Option<u64>) -> bool {
        let cost = match self.policy {
            CachePolicy::Count(_) => 1,
            CachePolicy::Tracked { .. } => cost,
        };
        if cost > self.policy.max_cost() {
            return false;
        }
        let mut inner = self.inner.write();
        if generation.is_some_and(|generation| generation != inner.generation) {
            return false;
        }
        let hits = match inner.map.swap_remove(&key) {
            Some(previous) => {
                inner.tracked_cost -= previous.cost;
                previous.hits.into_inner()
            }
            None => 0,
        };
        inner.tracked_cost += cost;
        inner.map.insert(key.clone(), Entry { data, cost, hits: AtomicU64::new(hits) });
        self.evict_excess(&mut inner, &key);
        self.age(&mut inner);
        true
    }

    fn evict_excess(&self, inner: &mut Inner<TKey, TData, S>, protected: &TKey) {
        while inner.map.len() > 1 && (inner.tracked_cost > self.policy.max_cost() || inner.map.len() > self.policy.max_items()) {
            let protected_index = inner.map.get_index_of(protected);
            let victim = Self::pick_victim(inner, protected_index);
            if let Some((_, entry)) = inner.map.swap_remove_index(victim) {
                inner.tracked_cost -= entry.cost;
            }
        }
    }

    /// Samples a few random entries and returns the index of the least frequently hit one
    fn pick_victim(inner: &Inner<TKey, TData, S>, protected_index: Option<usize>) -> usize {
        let len = inner.map.len();
        let mut rng = rand::thread_rng();
        let mut victim: Option<(usize, u64)> = None;
        for _ in 0..EVICTION_SAMPLE {
            let index = rng.gen_range(0..len);
            if Some(index) == protected_index {
                continue;
            }
            let hits = inner.map[index].hits.load(Ordering::Relaxed);
            if victim.is_none_or(|(_, fewest)| hits < fewest) {
                victim = Some((index, hits));
            }
        }
        match victim {
            Some((index, _)) => index,
            None if protected_index == Some(0) => 1,
            None => 0,
        }
    }

    fn age(&self, inner: &mut Inner<TKey, TData, S>) {
        inner.inserts_since_aging += 1;
        if inner.inserts_since_aging >= self.policy.max_items().saturating_mul(AGING_FACTOR) {
            inner.inserts_since_aging = 0;
            for entry in inner.map.values() {
                let hits = entry.hits.load(Ordering::Relaxed);
                entry.hits.store(hits / 2, Ordering::Relaxed);
            }
        }
    }

    pub fn remove(&self, key: &TKey) -> Option<TData> {
        let mut inner = self.inner.write();
        inner.generation += 1;
        let entry = inner.map.swap_remove(key)?;
        inner.tracked_cost -= entry.cost;
        Some(entry.data)
    }

    /// Drops all entries and releases the memory held by the map
    pub fn close(&self) {
        let mut inner = self.inner.write();
        inner.map.clear();
        inner.map.shrink_to_fit();
        inner.tracked_cost = 0;
        inner.inserts_since_aging = 0;
        inner.generation += 1;
    }

    pub fn len(&self) -> usize {
        self.inner.read().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().map.is_empty()
    }

    /// The summed cost of the cached entries
    pub fn tracked_cost(&self) -> usize {
        self.inner.read().tracked_cost
    }
}
